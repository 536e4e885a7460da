// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Io {0}")]
    Io(#[from] io::Error),
    #[error("unexpected end of buffer")]
    BufferTooShort,
    #[error("bad padding byte in encoded bytes")]
    BadPadding,
    #[error("bad format {0}")]
    BadFormat(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
