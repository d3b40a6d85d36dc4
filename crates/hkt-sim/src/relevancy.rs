//! Grid-indexed per-client interest tracking (SPEC_FULL.md §4.6).

use std::collections::{HashMap, HashSet};

/// Opaque per-client identifier, assigned by the transport layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

/// A cell coordinate in the horizontal grid.
pub type Cell = (i64, i64);

struct ClientRecord {
    position: (i64, i64, i64),
    cell: Cell,
    dirty: bool,
    subscribed: HashSet<Cell>,
}

fn square_of_cells(centre: Cell, radius: i64) -> HashSet<Cell> {
    let mut cells = HashSet::new();
    for dx in -radius..=radius {
        for dy in -radius..=radius {
            cells.insert((centre.0 + dx, centre.1 + dy));
        }
    }
    cells
}

/// A uniform grid over the horizontal plane with a configurable cell size
/// and interest radius, giving each registered client an O(1) interest
/// test over its subscribed cells.
pub struct RelevancyIndex {
    cell_size_cm: i64,
    interest_radius_cells: i64,
    clients: HashMap<ClientId, ClientRecord>,
}

impl RelevancyIndex {
    pub fn new(cell_size_cm: i64, interest_radius_cells: u32) -> Self {
        Self { cell_size_cm, interest_radius_cells: interest_radius_cells as i64, clients: HashMap::new() }
    }

    /// Pure division into grid coordinates; no rounding beyond integer
    /// truncation toward zero (positions are centimetres, always divided
    /// by the same positive cell size).
    pub fn location_to_cell(&self, position: (i64, i64, i64)) -> Cell {
        (position.0.div_euclid(self.cell_size_cm), position.1.div_euclid(self.cell_size_cm))
    }

    pub fn register_client(&mut self, client: ClientId) {
        self.clients.insert(
            client,
            ClientRecord { position: (0, 0, 0), cell: (0, 0), dirty: true, subscribed: HashSet::new() },
        );
    }

    pub fn unregister_client(&mut self, client: ClientId) {
        self.clients.remove(&client);
    }

    /// Records the client's current pawn position. Marks the client dirty
    /// for the next `update` if the position changed.
    pub fn set_client_position(&mut self, client: ClientId, position: (i64, i64, i64)) {
        if let Some(record) = self.clients.get_mut(&client) {
            if record.position != position {
                record.position = position;
                record.dirty = true;
            }
        }
    }

    /// Recomputes each dirty client's cell from its last recorded
    /// position; if the cell changed, rebuilds its subscribed-cells set.
    /// `dt` is accepted for interface parity with the rest of the tick
    /// pipeline but does not otherwise affect the recomputation.
    pub fn update(&mut self, _dt: f32) {
        for record in self.clients.values_mut() {
            if !record.dirty {
                continue;
            }
            record.dirty = false;
            let new_cell = (
                record.position.0.div_euclid(self.cell_size_cm),
                record.position.1.div_euclid(self.cell_size_cm),
            );
            if new_cell != record.cell || record.subscribed.is_empty() {
                record.cell = new_cell;
                record.subscribed = square_of_cells(new_cell, self.interest_radius_cells);
            }
        }
    }

    pub fn is_interested(&self, client: ClientId, cell: Cell) -> bool {
        self.clients.get(&client).map(|r| r.subscribed.contains(&cell)).unwrap_or(false)
    }

    /// Global events bypass spatial filtering entirely.
    pub fn is_interested_global(&self, _cell: Cell) -> bool {
        true
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}
