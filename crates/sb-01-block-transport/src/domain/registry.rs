//! Edge registry of one transport server.
//!
//! Edges are kept sorted by their start in server coordinates so placement
//! and fan-out can walk the extent map in address order. Server indices are
//! handed out once and never reused while the server lives.

use serde::{Deserialize, Serialize};
use shared_types::{
    BlockCount, EdgeHandle, EdgeIndex, Lba, MedicActionPriority, ObjectId, PathState, ServerId,
};

use crate::domain::edge::BlockEdge;
use crate::error::TransportError;

/// Where [`EdgeRegistry::validate_capacity`] may place a new extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementPolicy {
    /// Lowest free extent that fits.
    FirstFit,
    /// Smallest free extent that fits; lowest address on ties.
    BestFit,
    /// Exactly at this offset.
    SpecificLocation(Lba),
}

/// Result of a successful placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityPlacement {
    pub offset: Lba,
    /// Position the new edge takes in address order.
    pub client_index: EdgeIndex,
}

#[derive(Debug)]
pub struct EdgeRegistry {
    edges: Vec<BlockEdge>,
    capacity: BlockCount,
    default_offset: Lba,
    next_index: u32,
}

impl EdgeRegistry {
    #[must_use]
    pub fn new(capacity: BlockCount, default_offset: Lba) -> Self {
        Self {
            edges: Vec::new(),
            capacity,
            default_offset,
            next_index: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> BlockCount {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: BlockCount) {
        self.capacity = capacity;
    }

    #[must_use]
    pub fn default_offset(&self) -> Lba {
        self.default_offset
    }

    pub fn set_default_offset(&mut self, offset: Lba) {
        self.default_offset = offset;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockEdge> {
        self.edges.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut BlockEdge> {
        self.edges.iter_mut()
    }

    #[must_use]
    pub fn get(&self, index: EdgeIndex) -> Option<&BlockEdge> {
        self.edges.iter().find(|e| e.server_index() == index)
    }

    pub fn get_mut(&mut self, index: EdgeIndex) -> Option<&mut BlockEdge> {
        self.edges.iter_mut().find(|e| e.server_index() == index)
    }

    /// Edge attached by `client` from its slot `client_index`.
    #[must_use]
    pub fn find_client_edge(
        &self,
        client: ObjectId,
        client_index: EdgeIndex,
    ) -> Option<&BlockEdge> {
        self.edges
            .iter()
            .find(|e| e.client_id == client && e.client_index == client_index)
    }

    pub fn find_client_edge_mut(&mut self, client: ObjectId) -> Option<&mut BlockEdge> {
        self.edges.iter_mut().find(|e| e.client_id == client)
    }

    // -------------------------------------------------------------------------
    // Attach / detach
    // -------------------------------------------------------------------------

    /// Insert `edge`, assigning it the next server index.
    pub fn attach(
        &mut self,
        server: ServerId,
        server_object: ObjectId,
        mut edge: BlockEdge,
        path_state: PathState,
    ) -> Result<EdgeHandle, TransportError> {
        if edge.is_attached()
            || (edge.has_valid_client()
                && self
                    .find_client_edge(edge.client_id, edge.client_index)
                    .is_some())
        {
            return Err(TransportError::EdgeAlreadyAttached {
                client: edge.client_id,
                client_index: edge.client_index,
            });
        }
        if edge.capacity == 0 {
            return Err(TransportError::ZeroCapacity);
        }
        let end = edge.end_lba();
        if end > self.capacity {
            return Err(TransportError::CapacityExceeded {
                requested: end,
                available: self.capacity,
            });
        }
        if self
            .edges
            .iter()
            .any(|e| e.overlaps(edge.block_offset(), edge.capacity))
        {
            return Err(TransportError::ExtentOverlap {
                offset: edge.block_offset(),
                capacity: edge.capacity,
            });
        }

        let index = EdgeIndex(self.next_index);
        self.next_index = self.next_index.wrapping_add(1);

        edge.server_id = server_object;
        edge.medic_priority = MedicActionPriority::Idle;
        edge.set_path_state(path_state);
        edge.mark_attached(server, index);

        let position = self
            .edges
            .partition_point(|e| e.block_offset() <= edge.block_offset());
        let handle = EdgeHandle {
            server,
            server_index: index,
        };
        self.edges.insert(position, edge);
        Ok(handle)
    }

    /// Remove the edge at `index` and hand it back unattached.
    pub fn detach(&mut self, index: EdgeIndex) -> Result<BlockEdge, TransportError> {
        let position = self
            .edges
            .iter()
            .position(|e| e.server_index() == index)
            .ok_or(TransportError::EdgeNotAttached(index))?;
        let mut edge = self.edges.remove(position);
        edge.mark_detached();
        Ok(edge)
    }

    // -------------------------------------------------------------------------
    // Extent queries
    // -------------------------------------------------------------------------

    /// Free extents at or after the default offset, in address order.
    fn free_extents(&self, start: Lba) -> Vec<(Lba, BlockCount)> {
        let mut gaps = Vec::new();
        let mut cursor = start;
        for edge in &self.edges {
            if edge.end_lba() <= cursor {
                continue;
            }
            if edge.block_offset() > cursor {
                gaps.push((cursor, edge.block_offset() - cursor));
            }
            cursor = cursor.max(edge.end_lba());
        }
        if cursor < self.capacity {
            gaps.push((cursor, self.capacity - cursor));
        }
        gaps
    }

    /// Number of edges starting below `offset`.
    fn position_for(&self, offset: Lba) -> EdgeIndex {
        let below = self
            .edges
            .iter()
            .filter(|e| e.block_offset() < offset)
            .count();
        EdgeIndex(u32::try_from(below).unwrap_or(u32::MAX))
    }

    /// Choose an offset for a new extent of `capacity` blocks.
    ///
    /// On failure the error carries the largest capacity that would fit.
    pub fn validate_capacity(
        &self,
        capacity: BlockCount,
        policy: PlacementPolicy,
        ignore_offset: bool,
    ) -> Result<CapacityPlacement, TransportError> {
        if capacity == 0 {
            return Err(TransportError::ZeroCapacity);
        }

        if let PlacementPolicy::SpecificLocation(offset) = policy {
            if offset >= self.capacity {
                return Err(TransportError::NoAvailableExtent { available: 0 });
            }
            if self.edges.iter().any(|e| e.is_lba_in_extent(offset)) {
                return Err(TransportError::NoAvailableExtent { available: 0 });
            }
            let limit = self
                .edges
                .iter()
                .map(BlockEdge::block_offset)
                .filter(|&start| start > offset)
                .min()
                .unwrap_or(self.capacity);
            let available = limit - offset;
            if capacity > available {
                return Err(TransportError::NoAvailableExtent { available });
            }
            return Ok(CapacityPlacement {
                offset,
                client_index: self.position_for(offset),
            });
        }

        let start = if ignore_offset && self.edges.is_empty() {
            0
        } else {
            self.default_offset
        };
        let gaps = self.free_extents(start);
        let fitting = gaps.iter().filter(|(_, len)| *len >= capacity);
        let chosen = match policy {
            PlacementPolicy::BestFit => fitting.min_by_key(|(offset, len)| (*len, *offset)),
            _ => fitting.min_by_key(|(offset, _)| *offset),
        };

        match chosen {
            Some(&(offset, _)) => Ok(CapacityPlacement {
                offset,
                client_index: self.position_for(offset),
            }),
            None => Err(TransportError::NoAvailableExtent {
                available: gaps.iter().map(|(_, len)| *len).max().unwrap_or(0),
            }),
        }
    }

    /// Largest free extent at or after the default offset.
    #[must_use]
    pub fn max_unused_extent_size(&self) -> BlockCount {
        self.free_extents(self.default_offset)
            .iter()
            .map(|(_, len)| *len)
            .max()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn is_lba_range_consumed(&self, lba: Lba, blocks: BlockCount) -> bool {
        self.edges.iter().any(|e| e.overlaps(lba, blocks))
    }

    /// `lba` itself if an edge holds it, else the start of the next edge.
    #[must_use]
    pub fn find_next_consumed_lba(&self, lba: Lba) -> Option<Lba> {
        if self.edges.iter().any(|e| e.is_lba_in_extent(lba)) {
            return Some(lba);
        }
        self.edges
            .iter()
            .map(BlockEdge::block_offset)
            .filter(|&start| start >= lba)
            .min()
    }

    /// Inclusive last block of `[lba, lba + blocks)` that stays inside the
    /// edge holding `lba`.
    #[must_use]
    pub fn get_end_of_extent(&self, lba: Lba, blocks: BlockCount) -> Option<Lba> {
        if blocks == 0 {
            return None;
        }
        self.edges
            .iter()
            .find(|e| e.is_lba_in_extent(lba))
            .map(|e| (lba.saturating_add(blocks) - 1).min(e.end_lba() - 1))
    }

    #[must_use]
    pub fn server_index_for_lba(&self, lba: Lba) -> Option<EdgeIndex> {
        self.edges
            .iter()
            .find(|e| e.is_lba_in_extent(lba))
            .map(BlockEdge::server_index)
    }

    /// Highest client offset and highest client end, or `None` without
    /// clients.
    #[must_use]
    pub fn minimum_capacity_required(&self) -> Option<(Lba, BlockCount)> {
        let clients = self.edges.iter().filter(|e| e.has_valid_client());
        let (max_offset, consumed) = clients.fold((0, 0), |(offset, end), e| {
            (offset.max(e.offset), end.max(e.end_lba()))
        });
        if consumed == 0 {
            None
        } else {
            Some((max_offset, consumed))
        }
    }

    /// Lowest client edge sharing a block with `[lba, lba + blocks)`.
    #[must_use]
    pub fn first_overlapping_client(&self, lba: Lba, blocks: BlockCount) -> Option<&BlockEdge> {
        self.edges
            .iter()
            .find(|e| e.has_valid_client() && e.overlaps(lba, blocks))
    }
}
