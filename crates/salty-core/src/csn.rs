//! Combined sequence numbers.
//!
//! A CSN is 48 bits: a 16-bit overflow counter in front of a 32-bit
//! sequence number. Each direction starts from a random sequence with zero
//! overflow and must strictly increase.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{OverflowError, ValidationError};

/// A CSN value as it appears in one nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CombinedSequenceSnapshot {
    pub overflow: u16,
    pub sequence: u32,
}

impl CombinedSequenceSnapshot {
    pub fn new(overflow: u16, sequence: u32) -> Self {
        Self { overflow, sequence }
    }

    /// The 48-bit combined value.
    pub fn combined(&self) -> u64 {
        ((self.overflow as u64) << 32) | self.sequence as u64
    }
}

/// Outgoing CSN counter.
#[derive(Debug, Clone)]
pub struct CombinedSequence {
    overflow: u16,
    sequence: u32,
}

impl CombinedSequence {
    /// Start from a random sequence number and zero overflow.
    pub fn random() -> Self {
        Self {
            overflow: 0,
            sequence: OsRng.next_u32(),
        }
    }

    pub fn from_parts(overflow: u16, sequence: u32) -> Self {
        Self { overflow, sequence }
    }

    /// Current value, without advancing.
    pub fn current(&self) -> CombinedSequenceSnapshot {
        CombinedSequenceSnapshot::new(self.overflow, self.sequence)
    }

    /// Hand out the current value and advance.
    ///
    /// Fails once the overflow counter would have to exceed 16 bits. The
    /// counter is left untouched in that case.
    pub fn next(&mut self) -> Result<CombinedSequenceSnapshot, OverflowError> {
        let current = self.current();
        if self.sequence == u32::MAX {
            self.overflow = self.overflow.checked_add(1).ok_or(OverflowError)?;
            self.sequence = 0;
        } else {
            self.sequence += 1;
        }
        Ok(current)
    }
}

/// Our outgoing CSN towards a peer plus the last CSN received from it.
#[derive(Debug, Clone)]
pub struct CombinedSequencePair {
    ours: CombinedSequence,
    theirs: Option<CombinedSequenceSnapshot>,
}

impl CombinedSequencePair {
    pub fn new() -> Self {
        Self {
            ours: CombinedSequence::random(),
            theirs: None,
        }
    }

    pub fn ours(&mut self) -> &mut CombinedSequence {
        &mut self.ours
    }

    pub fn theirs(&self) -> Option<CombinedSequenceSnapshot> {
        self.theirs
    }

    /// Check the CSN of an incoming nonce and remember it.
    ///
    /// The first CSN must have zero overflow, every later CSN must be
    /// strictly greater than the previous one.
    pub fn validate_incoming(
        &mut self,
        csn: CombinedSequenceSnapshot,
    ) -> Result<(), ValidationError> {
        match self.theirs {
            None if csn.overflow != 0 => Err(ValidationError::critical(
                "first message from peer must have set the overflow number to zero",
            )),
            Some(last) if csn <= last => Err(ValidationError::critical(
                "combined sequence number did not increase",
            )),
            _ => {
                self.theirs = Some(csn);
                Ok(())
            }
        }
    }
}

impl Default for CombinedSequencePair {
    fn default() -> Self {
        Self::new()
    }
}
