// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use siobridge::transport::Transport;

use std::collections::VecDeque;
use std::io;

pub const MAX_ASSERT_ELEMENTS: usize = 100;

pub fn assert_eq_slices(expected_output: &[u8], output: &[u8], what: &str) {
    let max_len = usize::min(output.len(), expected_output.len());
    let max_len = max_len.min(MAX_ASSERT_ELEMENTS);
    assert_eq!(
        output[..max_len],
        expected_output[..max_len],
        "Expected contents of {} differs",
        what
    );
    assert_eq!(
        output.len(),
        expected_output.len(),
        "Expected length of {} differs",
        what
    );
    assert_eq!(
        output, expected_output,
        "Expected contents of {} differs",
        what
    );
}

/// A device that says exactly what it was scripted to, then goes quiet.
///
/// Everything the host sends is collected for inspection.
#[derive(Debug, Default)]
pub struct Script {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues bytes for the host to receive.
    pub fn push(&mut self, bytes: &[u8]) -> &mut Self {
        self.input.extend(bytes);
        self
    }

    pub fn push_u16(&mut self, v: u16) -> &mut Self {
        self.push(&v.to_le_bytes())
    }

    pub fn push_u32(&mut self, v: u32) -> &mut Self {
        self.push(&v.to_le_bytes())
    }

    /// Queues a `u8` length followed by `s`.
    pub fn push_short(&mut self, s: &[u8]) -> &mut Self {
        self.push(&[s.len() as u8]).push(s)
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Everything sent so far, clearing it.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    /// Bytes the host has not consumed.
    pub fn unread(&self) -> usize {
        self.input.len()
    }
}

impl Transport for Script {
    fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.output.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.input.len());
        for (dst, src) in buf.iter_mut().zip(self.input.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn pending(&mut self) -> io::Result<usize> {
        Ok(self.input.len())
    }
}

/// Splits a little endian reply.
pub struct Reply<'a>(pub &'a [u8]);

impl<'a> Reply<'a> {
    pub fn u8(&mut self) -> u8 {
        let (head, rest) = self.0.split_at(1);
        self.0 = rest;
        head[0]
    }

    pub fn u16(&mut self) -> u16 {
        let (head, rest) = self.0.split_at(2);
        self.0 = rest;
        u16::from_le_bytes([head[0], head[1]])
    }

    pub fn i16(&mut self) -> i16 {
        self.u16() as i16
    }

    pub fn u32(&mut self) -> u32 {
        let (head, rest) = self.0.split_at(4);
        self.0 = rest;
        u32::from_le_bytes([head[0], head[1], head[2], head[3]])
    }

    pub fn i32(&mut self) -> i32 {
        self.u32() as i32
    }

    pub fn bytes(&mut self, n: usize) -> &'a [u8] {
        let (head, rest) = self.0.split_at(n);
        self.0 = rest;
        head
    }

    pub fn rest(&self) -> &'a [u8] {
        self.0
    }
}
