// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! Span declarations handed to the command queue.
//!
//! Before a command is evaluated, it declares every span it may read or
//! write; the command queue serializes commands whose declared spans
//! conflict. Overshoot is harmless (spans may extend past the range),
//! under-declaration is a correctness bug.

use txn_types::Span;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpanAccess {
    ReadOnly,
    ReadWrite,
}

#[derive(Clone, Debug, Default)]
pub struct SpanSet {
    read_only: Vec<Span>,
    read_write: Vec<Span>,
}

impl SpanSet {
    pub fn add(&mut self, access: SpanAccess, span: Span) {
        match access {
            SpanAccess::ReadOnly => self.read_only.push(span),
            SpanAccess::ReadWrite => self.read_write.push(span),
        }
    }

    pub fn read_only(&self) -> &[Span] {
        &self.read_only
    }

    pub fn read_write(&self) -> &[Span] {
        &self.read_write
    }

    pub fn len(&self) -> usize {
        self.read_only.len() + self.read_write.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_only.is_empty() && self.read_write.is_empty()
    }

    pub fn contains(&self, access: SpanAccess, span: &Span) -> bool {
        match access {
            SpanAccess::ReadOnly => self.read_only.contains(span),
            SpanAccess::ReadWrite => self.read_write.contains(span),
        }
    }
}
