//! Heap Inspection Description
//!
//! Read-only structural description of the heap for external inspection
//! tools: region granularity, the address-to-region table, region type
//! tags and the monitoring counters. Barrier code never reads any of it.
//!
//! Values come from a [`HeapInspector`] implemented by the collector and
//! are exported as an ordered list of typed entries.

use indexmap::IndexMap;
use serde::Serialize;

/// Region type tags
///
/// Young and humongous tags share a mask bit so tools can test the
/// family with one `and`.
pub mod region_tag {
    pub const FREE: u32 = 0;
    pub const YOUNG_MASK: u32 = 2;
    pub const EDEN: u32 = YOUNG_MASK;
    pub const SURVIVOR: u32 = YOUNG_MASK | 1;
    pub const HUMONGOUS_MASK: u32 = 4;
    pub const STARTS_HUMONGOUS: u32 = HUMONGOUS_MASK;
    pub const CONTINUES_HUMONGOUS: u32 = HUMONGOUS_MASK | 1;
    pub const OLD_MASK: u32 = 8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RegionType {
    Free,
    Eden,
    Survivor,
    StartsHumongous,
    ContinuesHumongous,
    Old,
}

impl RegionType {
    pub fn tag(self) -> u32 {
        match self {
            RegionType::Free => region_tag::FREE,
            RegionType::Eden => region_tag::EDEN,
            RegionType::Survivor => region_tag::SURVIVOR,
            RegionType::StartsHumongous => region_tag::STARTS_HUMONGOUS,
            RegionType::ContinuesHumongous => region_tag::CONTINUES_HUMONGOUS,
            RegionType::Old => region_tag::OLD_MASK,
        }
    }

    pub fn from_tag(tag: u32) -> Option<RegionType> {
        match tag {
            region_tag::FREE => Some(RegionType::Free),
            region_tag::EDEN => Some(RegionType::Eden),
            region_tag::SURVIVOR => Some(RegionType::Survivor),
            region_tag::STARTS_HUMONGOUS => Some(RegionType::StartsHumongous),
            region_tag::CONTINUES_HUMONGOUS => Some(RegionType::ContinuesHumongous),
            region_tag::OLD_MASK => Some(RegionType::Old),
            _ => None,
        }
    }

    pub fn is_young(self) -> bool {
        self.tag() & region_tag::YOUNG_MASK != 0
    }

    pub fn is_humongous(self) -> bool {
        self.tag() & region_tag::HUMONGOUS_MASK != 0
    }

    pub fn is_old(self) -> bool {
        self.tag() & region_tag::OLD_MASK != 0
    }
}

/// Address-range-to-region lookup table
///
/// `biased_base` is `base - (heap_start >> shift_by)`, so a region index is
/// one shift and one subtraction away from any heap address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionTable {
    pub base: usize,
    pub length: usize,
    pub biased_base: usize,
    pub bias: usize,
    pub shift_by: u32,
}

impl RegionTable {
    /// Table for `length` regions of `1 << shift_by` bytes starting at
    /// `heap_start`, with its slot array at `base`
    pub fn new(base: usize, heap_start: usize, length: usize, shift_by: u32) -> Self {
        let bias = heap_start >> shift_by;
        Self {
            base,
            length,
            biased_base: base.wrapping_sub(bias * std::mem::size_of::<usize>()),
            bias,
            shift_by,
        }
    }

    pub fn region_size(&self) -> usize {
        1 << self.shift_by
    }

    pub fn heap_start(&self) -> usize {
        self.bias << self.shift_by
    }

    pub fn heap_end(&self) -> usize {
        self.heap_start() + self.length * self.region_size()
    }

    pub fn region_index_for(&self, address: usize) -> Option<usize> {
        let index = (address >> self.shift_by).checked_sub(self.bias)?;
        (index < self.length).then_some(index)
    }

    /// Address of the table slot describing the region of `address`
    pub fn slot_address_for(&self, address: usize) -> Option<usize> {
        self.region_index_for(address)?;
        Some(
            self.biased_base
                .wrapping_add((address >> self.shift_by) * std::mem::size_of::<usize>()),
        )
    }
}

/// Committed and used bytes per generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitoringCounters {
    pub eden_committed: usize,
    pub eden_used: usize,
    pub survivor_committed: usize,
    pub survivor_used: usize,
    pub old_committed: usize,
    pub old_used: usize,
}

/// Collector side of the inspection description
pub trait HeapInspector {
    fn region_table(&self) -> RegionTable;

    fn region_type(&self, index: usize) -> Option<RegionType>;

    fn counters(&self) -> MonitoringCounters;

    fn summary_bytes_used(&self) -> usize;

    fn old_set_length(&self) -> usize;

    fn humongous_set_length(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Static,
    Nonstatic,
    VolatileNonstatic,
}

/// One exported field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldEntry {
    pub type_name: &'static str,
    pub field: &'static str,
    pub type_string: &'static str,
    pub kind: FieldKind,
    pub value: u64,
}

/// Snapshot of everything exported to inspection tools
#[derive(Debug, Clone, Serialize)]
pub struct InspectionTable {
    fields: Vec<FieldEntry>,
    constants: IndexMap<&'static str, i64>,
    types: Vec<&'static str>,
}

impl InspectionTable {
    pub fn collect(inspector: &dyn HeapInspector) -> Self {
        let table = inspector.region_table();
        let counters = inspector.counters();
        let mut fields = Vec::new();
        let mut add = |type_name, field, type_string, kind, value: usize| {
            fields.push(FieldEntry {
                type_name,
                field,
                type_string,
                kind,
                value: value as u64,
            });
        };

        add("HeapRegion", "grain_bytes", "usize", FieldKind::Static, table.region_size());
        add("HeapRegion", "log_grain_bytes", "u32", FieldKind::Static, table.shift_by as usize);

        add("RegionTable", "base", "address", FieldKind::Nonstatic, table.base);
        add("RegionTable", "length", "usize", FieldKind::Nonstatic, table.length);
        add("RegionTable", "biased_base", "usize", FieldKind::Nonstatic, table.biased_base);
        add("RegionTable", "bias", "usize", FieldKind::Nonstatic, table.bias);
        add("RegionTable", "shift_by", "u32", FieldKind::Nonstatic, table.shift_by as usize);

        add(
            "CollectedHeap",
            "summary_bytes_used",
            "usize",
            FieldKind::VolatileNonstatic,
            inspector.summary_bytes_used(),
        );
        add(
            "RegionSet",
            "old_length",
            "u32",
            FieldKind::Nonstatic,
            inspector.old_set_length(),
        );
        add(
            "RegionSet",
            "humongous_length",
            "u32",
            FieldKind::Nonstatic,
            inspector.humongous_set_length(),
        );

        for (field, value) in [
            ("eden_space_committed", counters.eden_committed),
            ("eden_space_used", counters.eden_used),
            ("survivor_space_committed", counters.survivor_committed),
            ("survivor_space_used", counters.survivor_used),
            ("old_gen_committed", counters.old_committed),
            ("old_gen_used", counters.old_used),
        ] {
            add("MonitoringSupport", field, "usize", FieldKind::Nonstatic, value);
        }

        let mut constants = IndexMap::new();
        constants.insert("RegionType::FreeTag", i64::from(region_tag::FREE));
        constants.insert("RegionType::YoungMask", i64::from(region_tag::YOUNG_MASK));
        constants.insert("RegionType::EdenTag", i64::from(region_tag::EDEN));
        constants.insert("RegionType::SurvTag", i64::from(region_tag::SURVIVOR));
        constants.insert("RegionType::HumongousMask", i64::from(region_tag::HUMONGOUS_MASK));
        constants.insert(
            "RegionType::StartsHumongousTag",
            i64::from(region_tag::STARTS_HUMONGOUS),
        );
        constants.insert(
            "RegionType::ContinuesHumongousTag",
            i64::from(region_tag::CONTINUES_HUMONGOUS),
        );
        constants.insert("RegionType::OldMask", i64::from(region_tag::OLD_MASK));

        let types = vec![
            "RegionTable",
            "CollectedHeap",
            "HeapRegion",
            "RegionSet",
            "MonitoringSupport",
            "RegionType",
        ];

        Self {
            fields,
            constants,
            types,
        }
    }

    pub fn fields(&self) -> &[FieldEntry] {
        &self.fields
    }

    pub fn field(&self, type_name: &str, field: &str) -> Option<&FieldEntry> {
        self.fields
            .iter()
            .find(|e| e.type_name == type_name && e.field == field)
    }

    pub fn constant(&self, name: &str) -> Option<i64> {
        self.constants.get(name).copied()
    }

    pub fn constants(&self) -> &IndexMap<&'static str, i64> {
        &self.constants
    }

    pub fn types(&self) -> &[&'static str] {
        &self.types
    }

    /// Pretty JSON in declaration order
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Tag histogram over every region the table covers
pub fn region_census(inspector: &dyn HeapInspector) -> IndexMap<RegionType, usize> {
    let mut census = IndexMap::new();
    for index in 0..inspector.region_table().length {
        if let Some(ty) = inspector.region_type(index) {
            *census.entry(ty).or_insert(0) += 1;
        }
    }
    census
}
