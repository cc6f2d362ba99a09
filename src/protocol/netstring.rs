//! protocol::netstring
//!
//! Netstring framing (`<len>:<bytes>,`) and the reading side of the worker
//! protocol.
//!
//! The scheduler reads a worker's stdout with [`NetstringReader`]; tests and
//! tooling use [`parse_events`] to turn a captured stream into
//! [`WorkerEvent`]s.
//!
//! # Example
//!
//! ```
//! use branch_puller::protocol::netstring::{encode, parse_events, WorkerEvent};
//!
//! let mut wire = Vec::new();
//! for atom in ["log", "1", "Formats differ."] {
//!     wire.extend(encode(atom.as_bytes()));
//! }
//! assert_eq!(&wire[..6], b"3:log,");
//! assert_eq!(
//!     parse_events(&wire).unwrap(),
//!     vec![WorkerEvent::Log { message: "Formats differ.".into() }]
//! );
//! ```

use std::io::{BufRead, Read, Write};

use super::ProtocolError;

/// Longest length prefix accepted, in digits.
const MAX_LENGTH_DIGITS: usize = 10;

/// Frame `data` as a netstring.
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + MAX_LENGTH_DIGITS + 2);
    out.extend_from_slice(data.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(data);
    out.push(b',');
    out
}

/// Write `data` to `out` as a netstring.
pub fn write_netstring<W: Write>(out: &mut W, data: &[u8]) -> std::io::Result<()> {
    write!(out, "{}:", data.len())?;
    out.write_all(data)?;
    out.write_all(b",")
}

/// Reads netstrings from a byte stream.
#[derive(Debug)]
pub struct NetstringReader<R> {
    inner: R,
}

impl<R: BufRead> NetstringReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next netstring. Returns `None` at a clean end of stream.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::Malformed`] for a bad length prefix or terminator
    /// - [`ProtocolError::UnexpectedEof`] if the stream ends mid-frame
    pub fn read_netstring(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let mut header = Vec::new();
        let n = (&mut self.inner)
            .take(MAX_LENGTH_DIGITS as u64 + 1)
            .read_until(b':', &mut header)?;
        if n == 0 {
            return Ok(None);
        }
        if header.pop() != Some(b':') {
            return Err(if n > MAX_LENGTH_DIGITS {
                ProtocolError::Malformed(format!(
                    "length prefix longer than {} digits",
                    MAX_LENGTH_DIGITS
                ))
            } else {
                ProtocolError::UnexpectedEof
            });
        }
        if header.is_empty() || !header.iter().all(u8::is_ascii_digit) {
            return Err(ProtocolError::Malformed(format!(
                "bad length prefix {:?}",
                String::from_utf8_lossy(&header)
            )));
        }
        let len: usize = std::str::from_utf8(&header)
            .ok()
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| ProtocolError::Malformed("length prefix out of range".into()))?;

        let mut body = Vec::new();
        (&mut self.inner)
            .take(len as u64 + 1)
            .read_to_end(&mut body)?;
        if body.len() != len + 1 {
            return Err(ProtocolError::UnexpectedEof);
        }
        if body.pop() != Some(b',') {
            return Err(ProtocolError::Malformed("missing ',' terminator".into()));
        }
        Ok(Some(body))
    }

    /// Read the next netstring as UTF-8 text.
    pub fn read_string(&mut self) -> Result<Option<String>, ProtocolError> {
        match self.read_netstring()? {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| ProtocolError::Malformed(format!("atom is not UTF-8: {}", e))),
        }
    }

    fn expect_string(&mut self) -> Result<String, ProtocolError> {
        self.read_string()?.ok_or(ProtocolError::UnexpectedEof)
    }

    /// Read the next event. Returns `None` at a clean end of stream.
    pub fn read_event(&mut self) -> Result<Option<WorkerEvent>, ProtocolError> {
        let Some(command) = self.read_string()? else {
            return Ok(None);
        };
        let count_atom = self.expect_string()?;
        let count: usize = count_atom.parse().map_err(|_| {
            ProtocolError::Malformed(format!("bad argument count {:?}", count_atom))
        })?;
        let mut args = Vec::with_capacity(count.min(16));
        for _ in 0..count {
            args.push(self.expect_string()?);
        }
        WorkerEvent::from_parts(&command, args).map(Some)
    }
}

/// An event as the scheduler sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    StartMirroring,
    ProgressMade,
    BranchChanged {
        stacked_on_url: String,
        revision_before: String,
        revision_after: String,
        control_format: String,
        branch_format: String,
        repository_format: String,
    },
    MirrorFailed {
        message: String,
        oops_id: String,
    },
    Log {
        message: String,
    },
}

impl WorkerEvent {
    /// Whether this event ends the stream for a job.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerEvent::BranchChanged { .. } | WorkerEvent::MirrorFailed { .. }
        )
    }

    fn from_parts(command: &str, args: Vec<String>) -> Result<Self, ProtocolError> {
        let arity = |expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(ProtocolError::Malformed(format!(
                    "{} takes {} arguments, got {}",
                    command,
                    expected,
                    args.len()
                )))
            }
        };
        match command {
            "startMirroring" => arity(0).map(|()| WorkerEvent::StartMirroring),
            "progressMade" => arity(0).map(|()| WorkerEvent::ProgressMade),
            "branchChanged" => {
                arity(6)?;
                let mut args = args.into_iter();
                let mut next = || args.next().unwrap_or_default();
                Ok(WorkerEvent::BranchChanged {
                    stacked_on_url: next(),
                    revision_before: next(),
                    revision_after: next(),
                    control_format: next(),
                    branch_format: next(),
                    repository_format: next(),
                })
            }
            "mirrorFailed" => {
                arity(2)?;
                let mut args = args.into_iter();
                let mut next = || args.next().unwrap_or_default();
                Ok(WorkerEvent::MirrorFailed {
                    message: next(),
                    oops_id: next(),
                })
            }
            "log" => {
                arity(1)?;
                Ok(WorkerEvent::Log {
                    message: args.into_iter().next().unwrap_or_default(),
                })
            }
            other => Err(ProtocolError::Malformed(format!(
                "unknown command {:?}",
                other
            ))),
        }
    }
}

/// Decode every event in a captured stream.
pub fn parse_events(bytes: &[u8]) -> Result<Vec<WorkerEvent>, ProtocolError> {
    let mut reader = NetstringReader::new(bytes);
    let mut events = Vec::new();
    while let Some(event) = reader.read_event()? {
        events.push(event);
    }
    Ok(events)
}
