// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Scripted in-memory transport for protocol tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ByteStream, CommandWriter, DatagramSource};
use crate::error::TransportError;

#[derive(Default)]
struct MockInner {
    incoming: VecDeque<u8>,
    datagrams: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    fail_writes: bool,
    closed: bool,
    max_read: Option<usize>,
}

/// Shared handle to a scripted link. Clones see the same state.
#[derive(Clone, Default)]
pub struct MockLink {
    inner: Arc<Mutex<MockInner>>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockInner> {
        // A panicking test thread must not hide the bytes from the others.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue bytes for the read half.
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.lock().incoming.extend(bytes.iter().copied());
    }

    /// Queue one datagram for the datagram half.
    pub fn push_datagram(&self, datagram: Vec<u8>) {
        self.lock().datagrams.push_back(datagram);
    }

    /// Cap how many bytes a single read returns.
    pub fn set_max_read(&self, max: Option<usize>) {
        self.lock().max_read = max;
    }

    /// Make every subsequent write report zero bytes accepted.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Report the peer as gone once the queued bytes are drained.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    /// Commands written so far, one entry per `write` call.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.lock().incoming.len()
    }

    pub fn reader(&self) -> MockReader {
        MockReader { link: self.clone() }
    }

    pub fn writer(&self) -> MockWriter {
        MockWriter { link: self.clone() }
    }

    pub fn datagrams(&self) -> MockDatagrams {
        MockDatagrams { link: self.clone() }
    }
}

pub struct MockReader {
    link: MockLink,
}

impl ByteStream for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut inner = self.link.lock();
        if inner.incoming.is_empty() {
            return if inner.closed {
                Err(TransportError::Disconnected)
            } else {
                Ok(0)
            };
        }
        let limit = inner.max_read.unwrap_or(usize::MAX);
        let n = buf.len().min(inner.incoming.len()).min(limit);
        for (dst, src) in buf.iter_mut().zip(inner.incoming.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn bytes_pending(&mut self) -> Result<usize, TransportError> {
        Ok(self.link.lock().incoming.len())
    }
}

pub struct MockWriter {
    link: MockLink,
}

impl CommandWriter for MockWriter {
    fn write(&self, buf: &[u8]) -> Result<usize, TransportError> {
        let mut inner = self.link.lock();
        if inner.closed {
            return Err(TransportError::Disconnected);
        }
        if inner.fail_writes {
            return Ok(0);
        }
        inner.written.push(buf.to_vec());
        Ok(buf.len())
    }
}

pub struct MockDatagrams {
    link: MockLink,
}

impl DatagramSource for MockDatagrams {
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let Some(datagram) = self.link.lock().datagrams.pop_front() else {
            return Ok(0);
        };
        let n = datagram.len().min(buf.len());
        buf[..n].copy_from_slice(&datagram[..n]);
        Ok(n)
    }
}
