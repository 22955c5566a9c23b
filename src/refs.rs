use std::collections::HashMap;

use crate::result::{Error, Result};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTag {
    Null = 0,
    Ref = 1,
    NotNullValue = 2,
    TrackFirst = 3,
}

impl RefTag {
    pub(crate) fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Null),
            1 => Ok(Self::Ref),
            2 => Ok(Self::NotNullValue),
            3 => Ok(Self::TrackFirst),
            _ => Err(Error::Malformed("unknown reference tag")),
        }
    }
}

#[derive(Debug, Default)]
pub struct RefWriter {
    seen: HashMap<usize, u32>,
}

impl RefWriter {
    // None on first sight, after assigning the next sequence number
    pub fn observe(&mut self, identity: usize) -> Option<u32> {
        if let Some(&seq) = self.seen.get(&identity) {
            return Some(seq);
        }
        let seq = self.seen.len() as u32;
        self.seen.insert(identity, seq);
        None
    }

    pub fn reset(&mut self) {
        self.seen.clear();
    }
}

#[derive(Debug, Default)]
pub struct RefReader {
    objects: Vec<Value>,
}

impl RefReader {
    // the slot must be filled before any child of the object is read
    pub fn reserve(&mut self) -> usize {
        self.objects.push(Value::Null);
        self.objects.len() - 1
    }

    pub fn fill(&mut self, slot: usize, value: Value) {
        self.objects[slot] = value;
    }

    pub fn get(&self, seq: u32) -> Result<Value> {
        self.objects
            .get(seq as usize)
            .cloned()
            .ok_or(Error::Malformed("reference sequence out of range"))
    }

    pub fn reset(&mut self) {
        self.objects.clear();
    }
}
