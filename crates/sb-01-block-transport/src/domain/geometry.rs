//! Block-size geometry of an edge.
//!
//! A geometry names the physical block size of the server and the block size
//! it exports to the client. Negotiation is a pure lookup.

use serde::{Deserialize, Serialize};
use shared_types::{BlockCount, BlockSize, Lba, ValueError};

use crate::error::TransportError;

/// Physical/exported block-size pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum BlockEdgeGeometry {
    #[default]
    Invalid = 0,
    /// 512 physical, 512 exported.
    Native512 = 1,
    /// 512 physical, 520 exported.
    Emulated520On512 = 2,
    /// 520 physical, 520 exported.
    Native520 = 3,
    /// 4096 physical, 520 exported.
    Emulated520On4096 = 4,
    /// 4096 physical, 4096 exported.
    Native4096 = 5,
    /// 4160 physical, 520 exported.
    Emulated520On4160 = 6,
    /// 4160 physical, 4160 exported.
    Native4160 = 7,
}

/// Block sizes agreed for an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiatedBlockSize {
    pub exported_block_size: BlockSize,
    pub physical_block_size: BlockSize,
    /// Optimum transfer size, in exported blocks.
    pub optimum_block_size: u32,
}

impl BlockEdgeGeometry {
    pub fn negotiate(self) -> Result<NegotiatedBlockSize, TransportError> {
        let (exported, physical, optimum) = match self {
            BlockEdgeGeometry::Native512 => (512, 512, 1),
            BlockEdgeGeometry::Emulated520On512 => (520, 512, 64),
            BlockEdgeGeometry::Native520 => (520, 520, 1),
            BlockEdgeGeometry::Native4096 => (4096, 4096, 1),
            BlockEdgeGeometry::Emulated520On4096 => (520, 4096, 512),
            BlockEdgeGeometry::Native4160 => (4160, 4160, 8),
            BlockEdgeGeometry::Emulated520On4160 => (520, 4160, 8),
            BlockEdgeGeometry::Invalid => return Err(TransportError::InvalidGeometry(self as u32)),
        };
        Ok(NegotiatedBlockSize {
            exported_block_size: exported,
            physical_block_size: physical,
            optimum_block_size: optimum,
        })
    }
}

impl TryFrom<u32> for BlockEdgeGeometry {
    type Error = ValueError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => BlockEdgeGeometry::Invalid,
            1 => BlockEdgeGeometry::Native512,
            2 => BlockEdgeGeometry::Emulated520On512,
            3 => BlockEdgeGeometry::Native520,
            4 => BlockEdgeGeometry::Emulated520On4096,
            5 => BlockEdgeGeometry::Native4096,
            6 => BlockEdgeGeometry::Emulated520On4160,
            7 => BlockEdgeGeometry::Native4160,
            other => return Err(ValueError::UnknownGeometry(other)),
        })
    }
}

/// Widen `[lba, lba + blocks)` outward to multiples of `alignment` blocks.
///
/// An alignment of 0 or 1 and an empty extent are returned unchanged.
#[must_use]
pub fn align_io(alignment: u32, lba: Lba, blocks: BlockCount) -> (Lba, BlockCount) {
    let alignment = u64::from(alignment);
    if alignment <= 1 || blocks == 0 {
        return (lba, blocks);
    }
    let start = (lba / alignment) * alignment;
    let end = lba.saturating_add(blocks);
    let aligned_end = end.div_ceil(alignment).saturating_mul(alignment);
    (start, aligned_end - start)
}
