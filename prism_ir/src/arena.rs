//! Slot arena for variable-length operation records.
//!
//! The arena provides:
//! - **O(1) append**: Bump cursor over a zone-allocated slot array
//! - **Offset identifiers**: [`OpIndex`] is a byte offset, never an address,
//!   so identifiers survive reallocation of the backing storage
//! - **Bidirectional stepping**: Every run stores its length at both of its
//!   endpoints in a parallel size table, so both neighbours of a run are
//!   reachable in O(1) without back pointers
//! - **Bounded replacement**: A run may be overwritten in place by a run of
//!   the same or smaller length
//!
//! Side tables ([`SecondaryMap`], [`BitSet`]) keyed by the same identifiers
//! live here as well.

use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

use tracing::debug;

use crate::zone::Zone;

// =============================================================================
// Arena Configuration
// =============================================================================

/// One storage unit of the arena.
pub type Slot = u64;

/// Size of a [`Slot`] in bytes.
pub const SLOT_SIZE: usize = std::mem::size_of::<Slot>();

/// Longest run a single operation may occupy.
pub const MAX_RUN_SLOTS: usize = u16::MAX as usize;

/// Capacity ceiling in slots. Keeps every offset (and the invalid marker)
/// representable in a `u32`.
pub const MAX_CAPACITY: usize = u32::MAX as usize / SLOT_SIZE;

// =============================================================================
// Typed ID
// =============================================================================

/// Dense handle into a pool of `T`.
///
/// Trait impls are written out so they hold for every `T`, not just the
/// ones that implement the trait themselves.
pub struct Id<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Copy for Id<T> {}

impl<T> Clone for Id<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Id<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> std::hash::Hash for Id<T> {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> Id<T> {
    /// Wrap a raw pool position.
    #[inline]
    pub const fn new(index: u32) -> Self {
        Id {
            index,
            _marker: PhantomData,
        }
    }

    /// Position in the owning pool.
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Position in the owning pool, ready for slice indexing.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.index as usize
    }

    /// Marker for "no entry".
    pub const INVALID: Self = Id {
        index: u32::MAX,
        _marker: PhantomData,
    };

    /// False only for [`Id::INVALID`].
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.index != u32::MAX
    }
}

impl<T> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "@{}", self.index)
        } else {
            write!(f, "@INVALID")
        }
    }
}

/// Defaults to [`Id::INVALID`], so unset fields never alias pool entry 0.
impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::INVALID
    }
}

// =============================================================================
// Operation Index
// =============================================================================

/// Identifier of an operation: the byte offset of its run in the arena.
///
/// Ordering follows offsets, so it follows creation order for every run that
/// was appended (bounded replacement reuses the replaced identifier).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpIndex(u32);

impl OpIndex {
    /// Marker for "no operation".
    pub const INVALID: Self = OpIndex(u32::MAX);

    /// Create an index from a raw byte offset.
    #[inline]
    pub const fn from_offset(offset: u32) -> Self {
        OpIndex(offset)
    }

    /// Create an index pointing at the given slot.
    #[inline]
    pub const fn from_slot(slot: usize) -> Self {
        OpIndex((slot * SLOT_SIZE) as u32)
    }

    /// Byte offset into the arena.
    #[inline]
    pub const fn offset(self) -> u32 {
        self.0
    }

    /// First slot of the run.
    #[inline]
    pub const fn slot(self) -> usize {
        self.0 as usize / SLOT_SIZE
    }

    /// Dense id used to index side tables.
    #[inline]
    pub const fn id(self) -> u32 {
        self.0 / SLOT_SIZE as u32
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }
}

impl Default for OpIndex {
    fn default() -> Self {
        Self::INVALID
    }
}

impl std::fmt::Debug for OpIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.id())
        } else {
            write!(f, "#INVALID")
        }
    }
}

impl std::fmt::Display for OpIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.id())
    }
}

// =============================================================================
// Slot Arena
// =============================================================================

/// Append-only store of variable-length runs of [`Slot`]s.
///
/// `sizes[i]` holds the length of the run that starts or ends at slot `i`.
/// Entries strictly inside a run are meaningless.
pub struct SlotArena<'zone> {
    zone: &'zone Zone,
    slots: &'zone mut [Slot],
    sizes: &'zone mut [u16],
    /// First free slot.
    end: usize,
    /// Set while a bounded replacement is in progress: the cursor may not
    /// move past this slot.
    replace_limit: Option<usize>,
}

impl<'zone> SlotArena<'zone> {
    /// Create an arena with room for `capacity` slots.
    pub fn new(zone: &'zone Zone, capacity: usize) -> Self {
        assert!(
            capacity < MAX_CAPACITY,
            "arena capacity {capacity} exceeds the maximum of {MAX_CAPACITY} slots"
        );
        SlotArena {
            zone,
            slots: zone.alloc_slice(capacity, 0),
            sizes: zone.alloc_slice(capacity, 0),
            end: 0,
            replace_limit: None,
        }
    }

    /// Reserve `slot_count` slots at the end and return the new run's index.
    ///
    /// # Panics
    ///
    /// In every build, if `slot_count` is zero or larger than
    /// [`MAX_RUN_SLOTS`]; the size table could not record the run.
    pub fn allocate(&mut self, slot_count: usize) -> OpIndex {
        let len = match u16::try_from(slot_count) {
            Ok(len) if len > 0 => len,
            _ => panic!("run length {slot_count} out of range 1..={MAX_RUN_SLOTS}"),
        };
        if let Some(limit) = self.replace_limit {
            assert!(
                self.end + slot_count <= limit,
                "replacement run of {slot_count} slots overflows the replaced run"
            );
        }
        if self.capacity() - self.end < slot_count {
            self.grow(self.capacity() + slot_count);
        }

        let first = self.end;
        self.end += slot_count;
        self.sizes[first] = len;
        self.sizes[first + slot_count - 1] = len;
        OpIndex::from_slot(first)
    }

    /// Drop the most recently allocated run.
    pub fn remove_last(&mut self) {
        debug_assert!(self.end > 0, "remove_last on an empty arena");
        let slot_count = self.sizes[self.end - 1] as usize;
        debug_assert!(slot_count > 0 && slot_count <= self.end);
        self.end -= slot_count;
    }

    /// Rebuild the run at `replaced` in place.
    ///
    /// `build` runs with the write cursor rewound to `replaced` and must
    /// allocate exactly one run no longer than the original. Afterwards the
    /// cursor is restored and the original length is written back to both
    /// ends of the size table, so stepping across the run is unchanged.
    ///
    /// # Panics
    ///
    /// In every build, if `build` allocates past the end of the original run.
    pub fn replace<R>(&mut self, replaced: OpIndex, build: impl FnOnce(&mut Self) -> R) -> R {
        assert!(self.replace_limit.is_none(), "nested bounded replacement");
        let first = replaced.slot();
        debug_assert!(first < self.end, "replacing {replaced:?} beyond the arena end");
        let old_count = self.sizes[first] as usize;
        let old_end = self.end;

        self.end = first;
        self.replace_limit = Some(first + old_count);
        let result = build(self);
        debug_assert!(self.end <= first + old_count);

        self.end = old_end;
        self.replace_limit = None;
        let len = old_count as u16;
        self.sizes[first] = len;
        self.sizes[first + old_count - 1] = len;
        result
    }

    /// Storage of the run at `idx`.
    #[inline]
    pub fn get(&self, idx: OpIndex) -> &[Slot] {
        let first = idx.slot();
        debug_assert!(first < self.end, "{idx:?} is past the arena end");
        &self.slots[first..first + self.sizes[first] as usize]
    }

    /// Mutable storage of the run at `idx`.
    #[inline]
    pub fn get_mut(&mut self, idx: OpIndex) -> &mut [Slot] {
        let first = idx.slot();
        debug_assert!(first < self.end, "{idx:?} is past the arena end");
        let len = self.sizes[first] as usize;
        &mut self.slots[first..first + len]
    }

    /// Length in slots recorded for the run at `idx`.
    #[inline]
    pub fn slot_count(&self, idx: OpIndex) -> u16 {
        debug_assert!(idx.slot() < self.end, "{idx:?} is past the arena end");
        self.sizes[idx.slot()]
    }

    /// Index of the run following `idx`.
    #[inline]
    pub fn next(&self, idx: OpIndex) -> OpIndex {
        let slot = idx.slot();
        debug_assert!(self.sizes[slot] > 0, "{idx:?} does not start a run");
        let result = slot + self.sizes[slot] as usize;
        debug_assert!(result <= self.capacity());
        OpIndex::from_slot(result)
    }

    /// Index of the run preceding `idx`.
    #[inline]
    pub fn previous(&self, idx: OpIndex) -> OpIndex {
        let slot = idx.slot();
        debug_assert!(slot > 0, "no run precedes the first one");
        debug_assert!(self.sizes[slot - 1] > 0, "{idx:?} does not follow a run");
        OpIndex::from_slot(slot - self.sizes[slot - 1] as usize)
    }

    /// Index of the first run.
    #[inline]
    pub fn begin_index(&self) -> OpIndex {
        OpIndex::from_slot(0)
    }

    /// One-past-the-end index; the index the next allocation will receive.
    #[inline]
    pub fn end_index(&self) -> OpIndex {
        OpIndex::from_slot(self.end)
    }

    /// Number of slots in use.
    #[inline]
    pub fn len(&self) -> usize {
        self.end
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end == 0
    }

    /// Number of slots available before the next growth.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Whether a bounded replacement is in progress.
    #[inline]
    pub fn is_replacing(&self) -> bool {
        self.replace_limit.is_some()
    }

    /// Forget every run. Capacity is kept.
    pub fn reset(&mut self) {
        debug_assert!(self.replace_limit.is_none());
        self.end = 0;
    }

    /// Reallocate from the zone with at least `min_capacity` slots.
    fn grow(&mut self, min_capacity: usize) {
        assert!(
            self.replace_limit.is_none(),
            "the arena cannot grow during a bounded replacement"
        );
        let old_capacity = self.capacity();
        let mut new_capacity = (2 * old_capacity).max(1);
        while new_capacity < min_capacity {
            new_capacity *= 2;
        }
        assert!(
            new_capacity < MAX_CAPACITY,
            "operation arena exceeded {MAX_CAPACITY} slots"
        );

        let zone = self.zone;
        let slots = zone.alloc_slice(new_capacity, 0);
        slots[..self.end].copy_from_slice(&self.slots[..self.end]);
        let sizes = zone.alloc_slice(new_capacity, 0);
        sizes[..self.end].copy_from_slice(&self.sizes[..self.end]);

        debug!(old_capacity, new_capacity, used = self.end, "grew operation arena");
        self.slots = slots;
        self.sizes = sizes;
    }
}

impl std::fmt::Debug for SlotArena<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotArena")
            .field("len", &self.end)
            .field("capacity", &self.capacity())
            .field("replacing", &self.is_replacing())
            .finish()
    }
}

// =============================================================================
// Secondary Map
// =============================================================================

/// Keys usable with [`SecondaryMap`].
pub trait SideTableKey: Copy {
    /// Dense position of the key in a side table.
    fn key(self) -> usize;
}

impl<T> SideTableKey for Id<T> {
    #[inline]
    fn key(self) -> usize {
        self.as_usize()
    }
}

impl SideTableKey for OpIndex {
    #[inline]
    fn key(self) -> usize {
        self.id() as usize
    }
}

/// A side table that associates additional data with operations or blocks.
///
/// Passes use this to attach computed properties (liveness, use counts,
/// mapping into the next phase's graph) without touching the records.
/// Size it with `Graph::op_id_count` or `Graph::block_count`.
#[derive(Debug, Clone)]
pub struct SecondaryMap<K, V> {
    values: Vec<V>,
    _marker: PhantomData<fn(K)>,
}

impl<K: SideTableKey, V: Default + Clone> SecondaryMap<K, V> {
    pub fn new() -> Self {
        SecondaryMap {
            values: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Create a map with a default value for each of `capacity` keys.
    pub fn with_capacity(capacity: usize) -> Self {
        SecondaryMap {
            values: vec![V::default(); capacity],
            _marker: PhantomData,
        }
    }

    /// Grow to at least `len` entries.
    pub fn resize(&mut self, len: usize) {
        if len > self.values.len() {
            self.values.resize(len, V::default());
        }
    }

    pub fn get(&self, key: K) -> Option<&V> {
        self.values.get(key.key())
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        self.values.get_mut(key.key())
    }

    /// Set a value, growing the table if needed.
    pub fn set(&mut self, key: K, value: V) {
        let idx = key.key();
        if idx >= self.values.len() {
            self.values.resize(idx + 1, V::default());
        }
        self.values[idx] = value;
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl<K: SideTableKey, V: Default + Clone> Default for SecondaryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: SideTableKey, V: Default + Clone> Index<K> for SecondaryMap<K, V> {
    type Output = V;

    fn index(&self, key: K) -> &Self::Output {
        &self.values[key.key()]
    }
}

impl<K: SideTableKey, V: Default + Clone> IndexMut<K> for SecondaryMap<K, V> {
    fn index_mut(&mut self, key: K) -> &mut Self::Output {
        &mut self.values[key.key()]
    }
}

// =============================================================================
// Bit Set
// =============================================================================

/// Set of dense ids, one bit each.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitSet {
    bits: Vec<u64>,
}

impl BitSet {
    pub fn new() -> Self {
        BitSet { bits: Vec::new() }
    }

    /// Room for `n` bits before the first reallocation.
    pub fn with_capacity(n: usize) -> Self {
        BitSet {
            bits: vec![0; n.div_ceil(64)],
        }
    }

    #[inline]
    pub fn insert(&mut self, index: usize) {
        let word = index / 64;
        if word >= self.bits.len() {
            self.bits.resize(word + 1, 0);
        }
        self.bits[word] |= 1 << (index % 64);
    }

    #[inline]
    pub fn remove(&mut self, index: usize) {
        if let Some(word) = self.bits.get_mut(index / 64) {
            *word &= !(1 << (index % 64));
        }
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        self.bits
            .get(index / 64)
            .is_some_and(|word| word & (1 << (index % 64)) != 0)
    }

    pub fn clear(&mut self) {
        self.bits.fill(0);
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&w| w == 0)
    }

    /// Number of members.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(arena: &mut SlotArena<'_>, idx: OpIndex, value: Slot) {
        for slot in arena.get_mut(idx) {
            *slot = value;
        }
    }

    #[test]
    fn test_allocate_records_both_ends() {
        let zone = Zone::new();
        let mut arena = SlotArena::new(&zone, 64);

        let a = arena.allocate(1);
        let b = arena.allocate(5);
        let c = arena.allocate(2);

        assert_eq!(a, OpIndex::from_slot(0));
        assert_eq!(b, OpIndex::from_slot(1));
        assert_eq!(c, OpIndex::from_slot(6));
        assert_eq!(arena.sizes[1], 5);
        assert_eq!(arena.sizes[5], 5);
        assert_eq!(arena.end_index(), OpIndex::from_slot(8));
    }

    #[test]
    fn test_next_and_previous() {
        let zone = Zone::new();
        let mut arena = SlotArena::new(&zone, 64);
        let ids: Vec<_> = [3, 1, 4, 1, 5].iter().map(|&n| arena.allocate(n)).collect();

        for pair in ids.windows(2) {
            assert_eq!(arena.next(pair[0]), pair[1]);
            assert_eq!(arena.previous(pair[1]), pair[0]);
        }
        assert_eq!(arena.next(ids[4]), arena.end_index());
        assert_eq!(arena.previous(arena.end_index()), ids[4]);
    }

    #[test]
    fn test_remove_last() {
        let zone = Zone::new();
        let mut arena = SlotArena::new(&zone, 64);
        let a = arena.allocate(2);
        let _b = arena.allocate(7);

        arena.remove_last();
        assert_eq!(arena.end_index(), arena.next(a));
        assert_eq!(arena.len(), 2);

        let c = arena.allocate(3);
        assert_eq!(arena.previous(c), a);
    }

    #[test]
    fn test_growth_preserves_records() {
        let zone = Zone::new();
        let mut arena = SlotArena::new(&zone, 4);
        let a = arena.allocate(3);
        fill(&mut arena, a, 0xAB);
        let before = arena.get(a).to_vec();

        let b = arena.allocate(10);
        assert!(arena.capacity() >= 13);
        assert_eq!(arena.get(a), before.as_slice());
        assert_eq!(arena.next(a), b);
        assert_eq!(arena.previous(b), a);
    }

    #[test]
    fn test_growth_from_zero_capacity() {
        let zone = Zone::new();
        let mut arena = SlotArena::new(&zone, 0);
        let a = arena.allocate(3);
        assert_eq!(a, OpIndex::from_slot(0));
        assert!(arena.capacity() >= 3);
    }

    #[test]
    fn test_replace_keeps_original_length() {
        let zone = Zone::new();
        let mut arena = SlotArena::new(&zone, 64);
        let a = arena.allocate(2);
        let b = arena.allocate(4);
        let c = arena.allocate(1);

        let written = arena.replace(b, |arena| arena.allocate(2));
        assert_eq!(written, b);
        assert_eq!(arena.slot_count(b), 4);
        assert_eq!(arena.next(b), c);
        assert_eq!(arena.previous(c), b);
        assert_eq!(arena.next(a), b);
        assert_eq!(arena.end_index(), arena.next(c));
        assert!(!arena.is_replacing());
    }

    #[test]
    #[should_panic(expected = "overflows the replaced run")]
    fn test_replace_with_larger_run_panics() {
        let zone = Zone::new();
        let mut arena = SlotArena::new(&zone, 64);
        let a = arena.allocate(2);
        arena.allocate(1);
        arena.replace(a, |arena| arena.allocate(3));
    }

    #[test]
    fn test_allocate_accepts_longest_run() {
        let zone = Zone::new();
        let mut arena = SlotArena::new(&zone, 16);
        let long = arena.allocate(MAX_RUN_SLOTS);
        let after = arena.allocate(1);
        assert_eq!(arena.slot_count(long) as usize, MAX_RUN_SLOTS);
        assert_eq!(arena.next(long), after);
        assert_eq!(arena.previous(after), long);
    }

    #[test]
    #[should_panic(expected = "run length 65536 out of range")]
    fn test_allocate_rejects_run_past_size_table_limit() {
        let zone = Zone::new();
        let mut arena = SlotArena::new(&zone, 16);
        arena.allocate(MAX_RUN_SLOTS + 1);
    }

    #[test]
    #[should_panic(expected = "run length 0 out of range")]
    fn test_allocate_rejects_empty_run() {
        let zone = Zone::new();
        let mut arena = SlotArena::new(&zone, 16);
        arena.allocate(0);
    }

    #[test]
    fn test_reset_keeps_capacity() {
        let zone = Zone::new();
        let mut arena = SlotArena::new(&zone, 8);
        arena.allocate(20);
        let capacity = arena.capacity();

        arena.reset();
        assert!(arena.is_empty());
        assert_eq!(arena.capacity(), capacity);
        assert_eq!(arena.allocate(1), OpIndex::from_slot(0));
    }

    #[test]
    fn test_op_index_encoding() {
        let idx = OpIndex::from_slot(5);
        assert_eq!(idx.offset(), 40);
        assert_eq!(idx.slot(), 5);
        assert_eq!(idx.id(), 5);
        assert!(OpIndex::from_slot(2) < idx);
        assert!(!OpIndex::INVALID.is_valid());
        assert_eq!(OpIndex::default(), OpIndex::INVALID);
    }

    #[test]
    fn test_secondary_map() {
        let mut map: SecondaryMap<OpIndex, u32> = SecondaryMap::new();
        map.set(OpIndex::from_slot(3), 30);
        map.set(OpIndex::from_slot(0), 1);

        assert_eq!(map[OpIndex::from_slot(3)], 30);
        assert_eq!(map[OpIndex::from_slot(0)], 1);
        assert_eq!(map.get(OpIndex::from_slot(1)), Some(&0));
        assert_eq!(map.get(OpIndex::from_slot(9)), None);
    }

    #[test]
    fn test_bit_set_grows_on_insert() {
        let mut visited = BitSet::new();
        for id in [3, 64, 130] {
            visited.insert(id);
        }

        assert!(visited.contains(130));
        assert!(!visited.contains(4));
        assert!(!visited.contains(10_000));
        assert_eq!(visited.count(), 3);

        visited.remove(64);
        assert_eq!(visited.count(), 2);
        visited.clear();
        assert!(visited.is_empty());
    }

    #[test]
    fn test_typed_id() {
        assert!(!Id::<u8>::INVALID.is_valid());
        assert_eq!(Id::<u8>::default(), Id::INVALID);
        assert!(Id::<u8>::new(1) < Id::new(2));
        assert_eq!(format!("{:?}", Id::<u8>::new(7)), "@7");
    }
}
