/// Page-table geometry Memoria announces to every CPU at handshake time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingGeometry {
    pub page_size: u32,
    pub entries_per_table: u32,
    pub levels: u32,
}

impl PagingGeometry {
    /// Creates a geometry from its three parameters.
    pub fn new(page_size: u32, entries_per_table: u32, levels: u32) -> Self {
        Self {
            page_size,
            entries_per_table,
            levels,
        }
    }

    /// Returns the page number that holds `address`.
    pub fn page_of(&self, address: u32) -> u32 {
        address / self.page_size
    }

    /// Returns the offset of `address` inside its page.
    pub fn offset_of(&self, address: u32) -> u32 {
        address % self.page_size
    }

    /// Returns the number of pages needed to hold `size_bytes`.
    pub fn pages_for(&self, size_bytes: u32) -> u32 {
        size_bytes.div_ceil(self.page_size)
    }

    /// Returns the entry index used at `level` (1-based, 1 = root) when
    /// walking to `page`. The page number is read as a mixed-radix value
    /// with `levels` digits of base `entries_per_table`.
    pub fn index_at_level(&self, page: u32, level: u32) -> u32 {
        let entries = self.entries_per_table as u64;
        match entries.checked_pow(self.levels.saturating_sub(level)) {
            Some(divisor) => ((page as u64 / divisor) % entries) as u32,
            // Wider than any u32 page number.
            None => 0,
        }
    }

    /// Returns false when the tree spans more pages than a `u64` can count.
    pub fn is_addressable(&self) -> bool {
        (self.entries_per_table as u64)
            .checked_pow(self.levels)
            .is_some()
    }

    /// Returns the number of distinct pages the tree can address.
    pub fn addressable_pages(&self) -> u64 {
        (self.entries_per_table as u64).saturating_pow(self.levels)
    }
}
