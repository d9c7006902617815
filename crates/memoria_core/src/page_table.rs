//! Multi-level page tables stored in an arena.
//!
//! Table references handed to CPUs are arena indices. The root is always
//! index 0 and sits at level 1; tables at level `levels` hold frame numbers.

use sim_common::PagingGeometry;

use crate::MemoryError;

/// Index of a table inside a [`PageTableTree`].
pub type TableRef = u32;

/// Slots of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableEntries {
    /// Interior level: references to next-level tables.
    SubTables(Vec<Option<TableRef>>),
    /// Leaf level: frame numbers.
    Frames(Vec<Option<u32>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Table {
    level: u32,
    entries: TableEntries,
}

/// Page-table tree for a single process.
#[derive(Debug, Clone)]
pub struct PageTableTree {
    geometry: PagingGeometry,
    tables: Vec<Table>,
}

impl PageTableTree {
    /// Creates a tree holding only an empty root table.
    pub fn new(geometry: PagingGeometry) -> Self {
        let mut tree = Self {
            geometry,
            tables: Vec::new(),
        };
        tree.push_table(1);
        tree
    }

    fn push_table(&mut self, level: u32) -> TableRef {
        let slots = self.geometry.entries_per_table as usize;
        let entries = if level == self.geometry.levels {
            TableEntries::Frames(vec![None; slots])
        } else {
            TableEntries::SubTables(vec![None; slots])
        };
        self.tables.push(Table { level, entries });
        (self.tables.len() - 1) as TableRef
    }

    /// Maps `page` to `frame`, creating intermediate tables on demand.
    pub fn map(&mut self, page: u32, frame: u32) -> Result<(), MemoryError> {
        if page as u64 >= self.geometry.addressable_pages() {
            return Err(MemoryError::OutOfRange);
        }
        let mut current: TableRef = 0;
        for level in 1..=self.geometry.levels {
            let index = self.geometry.index_at_level(page, level) as usize;
            let existing = match &self.tables[current as usize].entries {
                TableEntries::Frames(_) => None,
                TableEntries::SubTables(slots) => slots[index],
            };
            if level == self.geometry.levels {
                if let TableEntries::Frames(slots) = &mut self.tables[current as usize].entries {
                    slots[index] = Some(frame);
                }
                return Ok(());
            }
            current = match existing {
                Some(next) => next,
                None => {
                    let next = self.push_table(level + 1);
                    if let TableEntries::SubTables(slots) =
                        &mut self.tables[current as usize].entries
                    {
                        slots[index] = Some(next);
                    }
                    next
                }
            };
        }
        Ok(())
    }

    /// Returns the raw value of one entry: a frame number at the leaf level,
    /// a table reference above it. At level 1 `table_ref` is ignored and the
    /// root is used. `None` means the table or the entry does not exist.
    pub fn entry(&self, level: u32, table_ref: u64, index: u32) -> Option<u64> {
        if level == 0 || level > self.geometry.levels {
            return None;
        }
        let table_ref = if level == 1 { 0 } else { table_ref };
        let table = self.tables.get(usize::try_from(table_ref).ok()?)?;
        if table.level != level {
            return None;
        }
        match &table.entries {
            TableEntries::SubTables(slots) => slots.get(index as usize).copied()?.map(u64::from),
            TableEntries::Frames(slots) => slots.get(index as usize).copied()?.map(u64::from),
        }
    }

    /// Walks the whole tree for `page` and returns its frame.
    pub fn frame_of(&self, page: u32) -> Option<u32> {
        let mut table_ref = 0u64;
        for level in 1..=self.geometry.levels {
            let index = self.geometry.index_at_level(page, level);
            table_ref = self.entry(level, table_ref, index)?;
        }
        u32::try_from(table_ref).ok()
    }

    /// Returns the number of tables allocated, root included.
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}
