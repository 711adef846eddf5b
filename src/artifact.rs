//! Saved compiled state.
//!
//! A state file holds everything needed to run the input without reading the
//! script or the foods, groups and recipes files again: the input plan, the
//! stream settings and the finished food table. The layout is a header
//! naming the program and its version, the bincode-encoded body and a
//! sentinel value.

use crate::data::FoodTable;
use crate::error::FatalError;
use crate::plan::{ExecutionPlan, IoPlan};
use bincode::config::standard;
use bincode::serde::{decode_from_slice, encode_to_vec};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::info;

pub const IDENTITY: &str = "FoodCalc";
pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 3;
const SENTINEL: u32 = 12345;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StateHeader {
    identity: String,
    major: u16,
    minor: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedState {
    pub input: ExecutionPlan,
    pub io: IoPlan,
    pub table: FoodTable,
}

fn corrupt(e: impl std::fmt::Display) -> FatalError {
    FatalError::CorruptState(e.to_string())
}

impl SavedState {
    pub fn new(input: ExecutionPlan, io: IoPlan, table: FoodTable) -> Self {
        Self { input, io, table }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FatalError> {
        let header = StateHeader {
            identity: IDENTITY.to_string(),
            major: VERSION_MAJOR,
            minor: VERSION_MINOR,
        };
        let mut bytes = encode_to_vec(&header, standard()).map_err(corrupt)?;
        bytes.extend(encode_to_vec(self, standard()).map_err(corrupt)?);
        bytes.extend(encode_to_vec(SENTINEL, standard()).map_err(corrupt)?);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FatalError> {
        let (header, read): (StateHeader, usize) =
            decode_from_slice(bytes, standard()).map_err(corrupt)?;
        if header.identity != IDENTITY || header.major != VERSION_MAJOR || header.minor != VERSION_MINOR {
            return Err(FatalError::IncompatibleState {
                identity: header.identity,
                major: header.major,
                minor: header.minor,
            });
        }
        let rest = &bytes[read..];
        let (state, read): (SavedState, usize) = decode_from_slice(rest, standard()).map_err(corrupt)?;
        let (sentinel, _): (u32, usize) =
            decode_from_slice(&rest[read..], standard()).map_err(corrupt)?;
        if sentinel != SENTINEL {
            return Err(corrupt(format!("bad end marker {}", sentinel)));
        }
        Ok(state)
    }

    pub fn save(&self, path: &str) -> Result<(), FatalError> {
        let bytes = self.to_bytes()?;
        fs::write(path, bytes).map_err(|e| FatalError::Io {
            target: path.to_string(),
            message: e.to_string(),
        })?;
        info!("Saved state to {}. Foods: {}", path, self.table.len());
        Ok(())
    }

    pub fn from_file(path: &str) -> Result<Self, FatalError> {
        let bytes = fs::read(path).map_err(|e| FatalError::Open {
            file: path.to_string(),
            message: e.to_string(),
        })?;
        Self::from_bytes(&bytes)
    }
}
