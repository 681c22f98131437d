//! Operation records and the operation kinds stored in the graph.
//!
//! Every operation is stored as one run of slots:
//!
//! ```text
//! slot 0        header: opcode (16) | input count (16) | payload length (16)
//! slot 1..      inputs, two 32-bit offsets per slot
//! then          kind-specific payload slots
//! ```
//!
//! The graph itself only understands the header and the inputs. Everything
//! else goes through the [`Operation`] trait: a kind reports its inputs and
//! payload size, writes its payload, and reads itself back from an
//! [`OperationView`].

use std::fmt;
use std::iter::FusedIterator;

use smallvec::SmallVec;

use crate::arena::{OpIndex, Slot};
use crate::block::BlockId;
use crate::error::IrError;

// =============================================================================
// Opcodes
// =============================================================================

/// Tag identifying the kind of a stored operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Numeric constant.
    Constant = 0,
    /// Incoming function parameter.
    Parameter = 1,
    /// Two-operand arithmetic or bitwise operation.
    Binop = 2,
    /// Two-operand comparison producing a boolean.
    Comparison = 3,
    /// SSA merge of values flowing in from each predecessor.
    Phi = 4,
    /// Loop phi whose back-edge value is not known yet.
    PendingLoopPhi = 5,
    /// Unconditional jump.
    Goto = 6,
    /// Two-way conditional jump.
    Branch = 7,
    /// Function return.
    Return = 8,
}

impl Opcode {
    /// Number of opcodes; every valid tag is below this.
    pub const COUNT: usize = 9;

    /// Decode a raw tag.
    pub const fn from_raw(raw: u16) -> Option<Opcode> {
        Some(match raw {
            0 => Opcode::Constant,
            1 => Opcode::Parameter,
            2 => Opcode::Binop,
            3 => Opcode::Comparison,
            4 => Opcode::Phi,
            5 => Opcode::PendingLoopPhi,
            6 => Opcode::Goto,
            7 => Opcode::Branch,
            8 => Opcode::Return,
            _ => return None,
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            Opcode::Constant => "Constant",
            Opcode::Parameter => "Parameter",
            Opcode::Binop => "Binop",
            Opcode::Comparison => "Comparison",
            Opcode::Phi => "Phi",
            Opcode::PendingLoopPhi => "PendingLoopPhi",
            Opcode::Goto => "Goto",
            Opcode::Branch => "Branch",
            Opcode::Return => "Return",
        }
    }

    /// Whether an operation of this kind ends its block.
    pub const fn is_block_terminator(self) -> bool {
        matches!(self, Opcode::Goto | Opcode::Branch | Opcode::Return)
    }
}

impl TryFrom<u16> for Opcode {
    type Error = IrError;

    fn try_from(raw: u16) -> Result<Self, Self::Error> {
        Opcode::from_raw(raw).ok_or(IrError::InvalidOpcode(raw))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Record Layout
// =============================================================================

const HEADER_SLOTS: usize = 1;

/// Slots needed by a record with the given number of inputs and payload slots.
#[inline]
pub const fn record_slot_count(input_count: usize, payload_len: usize) -> usize {
    HEADER_SLOTS + input_count.div_ceil(2) + payload_len
}

#[inline]
fn pack_header(opcode: Opcode, input_count: usize, payload_len: usize) -> Slot {
    // Header bits: opcode [0, 16), input count [16, 48), payload length [48, 64).
    // Runs are at most `u16::MAX` slots, so any input count that got through
    // allocation fits in 32 bits.
    assert!(payload_len <= u16::MAX as usize, "payload too large");
    opcode as u16 as Slot | (input_count as Slot) << 16 | (payload_len as Slot) << 48
}

/// Write `op` into `run`, which must be at least `op.slot_count()` long.
pub(crate) fn encode<Op: Operation>(op: &Op, run: &mut [Slot]) {
    let inputs = op.inputs();
    let payload_len = op.payload_len();
    debug_assert!(run.len() >= record_slot_count(inputs.len(), payload_len));

    run[0] = pack_header(Op::OPCODE, inputs.len(), payload_len);
    for (i, pair) in inputs.chunks(2).enumerate() {
        let lo = pair[0].offset() as Slot;
        let hi = pair.get(1).map_or(0, |input| input.offset() as Slot);
        run[HEADER_SLOTS + i] = lo | hi << 32;
    }
    let start = HEADER_SLOTS + inputs.len().div_ceil(2);
    op.write_payload(&mut run[start..start + payload_len]);
}

// =============================================================================
// Operation Trait
// =============================================================================

/// Construction contract for an operation kind.
///
/// `inputs()` must list every operation the new one reads; the graph checks
/// them against its def-before-use rule and the generic passes walk them
/// without knowing the kind.
pub trait Operation: Sized {
    const OPCODE: Opcode;

    /// Operations this one reads, in order.
    fn inputs(&self) -> &[OpIndex];

    /// Number of payload slots following the inputs.
    fn payload_len(&self) -> usize {
        0
    }

    /// Write the payload. `payload.len() == self.payload_len()`.
    fn write_payload(&self, payload: &mut [Slot]) {
        debug_assert!(payload.is_empty());
    }

    /// Rebuild the operation from its stored record.
    fn read(view: &OperationView<'_>) -> Self;

    /// Total slots this operation occupies.
    fn slot_count(&self) -> usize {
        record_slot_count(self.inputs().len(), self.payload_len())
    }
}

// =============================================================================
// Operation View
// =============================================================================

/// Read-only view of one stored operation.
///
/// After a bounded replacement the underlying run may be longer than the
/// record; the header bounds everything the view reads.
#[derive(Clone, Copy)]
pub struct OperationView<'a> {
    index: OpIndex,
    record: &'a [Slot],
}

impl<'a> OperationView<'a> {
    pub(crate) fn new(index: OpIndex, record: &'a [Slot]) -> Self {
        debug_assert!(!record.is_empty());
        OperationView { index, record }
    }

    /// Identifier of this operation.
    #[inline]
    pub fn index(&self) -> OpIndex {
        self.index
    }

    #[inline]
    fn header(&self) -> Slot {
        self.record[0]
    }

    /// The opcode tag exactly as stored.
    #[inline]
    pub fn raw_opcode(&self) -> u16 {
        self.header() as u16
    }

    #[inline]
    pub fn has_valid_opcode(&self) -> bool {
        (self.raw_opcode() as usize) < Opcode::COUNT
    }

    /// Decoded opcode.
    ///
    /// # Panics
    ///
    /// If the tag is out of range, which means the index is stale or the
    /// record was corrupted.
    #[inline]
    pub fn opcode(&self) -> Opcode {
        match Opcode::from_raw(self.raw_opcode()) {
            Some(opcode) => opcode,
            None => panic!("{} has invalid opcode tag {}", self.index, self.raw_opcode()),
        }
    }

    #[inline]
    pub fn input_count(&self) -> usize {
        (self.header() >> 16) as u32 as usize
    }

    #[inline]
    pub fn payload_len(&self) -> usize {
        (self.header() >> 48) as u16 as usize
    }

    /// Slots used by the record itself.
    #[inline]
    pub fn slot_count(&self) -> usize {
        record_slot_count(self.input_count(), self.payload_len())
    }

    /// The `i`-th input.
    #[inline]
    pub fn input(&self, i: usize) -> OpIndex {
        debug_assert!(i < self.input_count(), "input {i} out of range");
        let packed = self.record[HEADER_SLOTS + i / 2];
        OpIndex::from_offset((packed >> (32 * (i % 2))) as u32)
    }

    /// All inputs in order.
    #[inline]
    pub fn inputs(&self) -> Inputs<'a> {
        Inputs {
            view: *self,
            front: 0,
            back: self.input_count(),
        }
    }

    /// Kind-specific payload.
    #[inline]
    pub fn payload(&self) -> &'a [Slot] {
        let start = HEADER_SLOTS + self.input_count().div_ceil(2);
        &self.record[start..start + self.payload_len()]
    }

    /// Whether this is an operation of kind `Op`.
    #[inline]
    pub fn is<Op: Operation>(&self) -> bool {
        self.raw_opcode() == Op::OPCODE as u16
    }

    /// Decode as `Op`, if it is one.
    #[inline]
    pub fn cast<Op: Operation>(&self) -> Option<Op> {
        self.is::<Op>().then(|| Op::read(self))
    }
}

impl fmt::Debug for OperationView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.index, self)
    }
}

impl fmt::Display for OperationView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(opcode) = Opcode::from_raw(self.raw_opcode()) else {
            return write!(f, "<invalid opcode {}>", self.raw_opcode());
        };
        write!(f, "{opcode}(")?;
        for (i, input) in self.inputs().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{input}")?;
        }
        f.write_str(")")?;

        match opcode {
            Opcode::Constant => {
                let constant = Constant::read(self);
                match constant.kind {
                    ConstantKind::Word32 | ConstantKind::Word64 => {
                        write!(f, "[{} {}]", constant.kind, constant.integer())
                    }
                    ConstantKind::Float64 => {
                        write!(f, "[{} {}]", constant.kind, constant.float_value())
                    }
                }
            }
            Opcode::Parameter => write!(f, "[{}]", Parameter::read(self).index),
            Opcode::Binop => write!(f, "[{}]", Binop::read(self).kind),
            Opcode::Comparison => write!(f, "[{}]", Comparison::read(self).kind),
            Opcode::PendingLoopPhi => write!(f, "[var {}]", PendingLoopPhi::read(self).variable),
            Opcode::Goto => write!(f, "[-> {:?}]", Goto::read(self).destination),
            Opcode::Branch => {
                let branch = Branch::read(self);
                write!(f, "[{:?}, {:?}]", branch.if_true, branch.if_false)
            }
            Opcode::Phi | Opcode::Return => Ok(()),
        }
    }
}

/// Iterator over the inputs of an operation.
#[derive(Clone)]
pub struct Inputs<'a> {
    view: OperationView<'a>,
    front: usize,
    back: usize,
}

impl Iterator for Inputs<'_> {
    type Item = OpIndex;

    #[inline]
    fn next(&mut self) -> Option<OpIndex> {
        if self.front == self.back {
            return None;
        }
        let input = self.view.input(self.front);
        self.front += 1;
        Some(input)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.back - self.front;
        (len, Some(len))
    }
}

impl DoubleEndedIterator for Inputs<'_> {
    #[inline]
    fn next_back(&mut self) -> Option<OpIndex> {
        if self.front == self.back {
            return None;
        }
        self.back -= 1;
        Some(self.view.input(self.back))
    }
}

impl ExactSizeIterator for Inputs<'_> {}
impl FusedIterator for Inputs<'_> {}

// =============================================================================
// Constants and Parameters
// =============================================================================

/// Representation of a constant's bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConstantKind {
    Word32 = 0,
    Word64 = 1,
    Float64 = 2,
}

impl ConstantKind {
    const fn from_raw(raw: Slot) -> Option<Self> {
        match raw {
            0 => Some(ConstantKind::Word32),
            1 => Some(ConstantKind::Word64),
            2 => Some(ConstantKind::Float64),
            _ => None,
        }
    }
}

impl fmt::Display for ConstantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConstantKind::Word32 => "word32",
            ConstantKind::Word64 => "word64",
            ConstantKind::Float64 => "float64",
        })
    }
}

/// A numeric constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constant {
    pub kind: ConstantKind,
    pub bits: u64,
}

impl Constant {
    pub fn word32(value: i32) -> Self {
        Constant {
            kind: ConstantKind::Word32,
            bits: value as u32 as u64,
        }
    }

    pub fn word64(value: i64) -> Self {
        Constant {
            kind: ConstantKind::Word64,
            bits: value as u64,
        }
    }

    pub fn float64(value: f64) -> Self {
        Constant {
            kind: ConstantKind::Float64,
            bits: value.to_bits(),
        }
    }

    /// Integer value, sign-extended. Meaningless for float constants.
    pub fn integer(&self) -> i64 {
        match self.kind {
            ConstantKind::Word32 => self.bits as u32 as i32 as i64,
            _ => self.bits as i64,
        }
    }

    /// Value of a float constant.
    pub fn float_value(&self) -> f64 {
        f64::from_bits(self.bits)
    }
}

impl Operation for Constant {
    const OPCODE: Opcode = Opcode::Constant;

    fn inputs(&self) -> &[OpIndex] {
        &[]
    }

    fn payload_len(&self) -> usize {
        2
    }

    fn write_payload(&self, payload: &mut [Slot]) {
        payload[0] = self.kind as Slot;
        payload[1] = self.bits;
    }

    fn read(view: &OperationView<'_>) -> Self {
        let payload = view.payload();
        let Some(kind) = ConstantKind::from_raw(payload[0]) else {
            panic!("{} has corrupt constant kind {}", view.index(), payload[0]);
        };
        Constant {
            kind,
            bits: payload[1],
        }
    }
}

/// The `index`-th incoming parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameter {
    pub index: u32,
}

impl Parameter {
    pub fn new(index: u32) -> Self {
        Parameter { index }
    }
}

impl Operation for Parameter {
    const OPCODE: Opcode = Opcode::Parameter;

    fn inputs(&self) -> &[OpIndex] {
        &[]
    }

    fn payload_len(&self) -> usize {
        1
    }

    fn write_payload(&self, payload: &mut [Slot]) {
        payload[0] = self.index as Slot;
    }

    fn read(view: &OperationView<'_>) -> Self {
        Parameter {
            index: view.payload()[0] as u32,
        }
    }
}

// =============================================================================
// Arithmetic and Comparison
// =============================================================================

/// Two-operand arithmetic or bitwise operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BinopKind {
    Add = 0,
    Sub = 1,
    Mul = 2,
    BitAnd = 3,
    BitOr = 4,
    BitXor = 5,
}

impl BinopKind {
    const fn from_raw(raw: Slot) -> Option<Self> {
        match raw {
            0 => Some(BinopKind::Add),
            1 => Some(BinopKind::Sub),
            2 => Some(BinopKind::Mul),
            3 => Some(BinopKind::BitAnd),
            4 => Some(BinopKind::BitOr),
            5 => Some(BinopKind::BitXor),
            _ => None,
        }
    }

    /// Check if this operation is commutative.
    pub const fn is_commutative(self) -> bool {
        !matches!(self, BinopKind::Sub)
    }
}

impl fmt::Display for BinopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// `left <kind> right`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binop {
    pub inputs: [OpIndex; 2],
    pub kind: BinopKind,
}

impl Binop {
    pub fn new(kind: BinopKind, left: OpIndex, right: OpIndex) -> Self {
        Binop {
            inputs: [left, right],
            kind,
        }
    }

    pub fn left(&self) -> OpIndex {
        self.inputs[0]
    }

    pub fn right(&self) -> OpIndex {
        self.inputs[1]
    }
}

impl Operation for Binop {
    const OPCODE: Opcode = Opcode::Binop;

    fn inputs(&self) -> &[OpIndex] {
        &self.inputs
    }

    fn payload_len(&self) -> usize {
        1
    }

    fn write_payload(&self, payload: &mut [Slot]) {
        payload[0] = self.kind as Slot;
    }

    fn read(view: &OperationView<'_>) -> Self {
        let raw = view.payload()[0];
        let Some(kind) = BinopKind::from_raw(raw) else {
            panic!("{} has corrupt binop kind {raw}", view.index());
        };
        Binop {
            inputs: [view.input(0), view.input(1)],
            kind,
        }
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ComparisonKind {
    Equal = 0,
    LessThan = 1,
    LessThanOrEqual = 2,
}

impl ComparisonKind {
    const fn from_raw(raw: Slot) -> Option<Self> {
        match raw {
            0 => Some(ComparisonKind::Equal),
            1 => Some(ComparisonKind::LessThan),
            2 => Some(ComparisonKind::LessThanOrEqual),
            _ => None,
        }
    }
}

impl fmt::Display for ComparisonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// `left <kind> right`, producing a boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Comparison {
    pub inputs: [OpIndex; 2],
    pub kind: ComparisonKind,
}

impl Comparison {
    pub fn new(kind: ComparisonKind, left: OpIndex, right: OpIndex) -> Self {
        Comparison {
            inputs: [left, right],
            kind,
        }
    }
}

impl Operation for Comparison {
    const OPCODE: Opcode = Opcode::Comparison;

    fn inputs(&self) -> &[OpIndex] {
        &self.inputs
    }

    fn payload_len(&self) -> usize {
        1
    }

    fn write_payload(&self, payload: &mut [Slot]) {
        payload[0] = self.kind as Slot;
    }

    fn read(view: &OperationView<'_>) -> Self {
        let raw = view.payload()[0];
        let Some(kind) = ComparisonKind::from_raw(raw) else {
            panic!("{} has corrupt comparison kind {raw}", view.index());
        };
        Comparison {
            inputs: [view.input(0), view.input(1)],
            kind,
        }
    }
}

// =============================================================================
// Phis
// =============================================================================

/// SSA merge: one input per predecessor of the enclosing block, in
/// predecessor order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phi {
    pub inputs: SmallVec<[OpIndex; 2]>,
}

impl Phi {
    pub fn new(inputs: &[OpIndex]) -> Self {
        Phi {
            inputs: SmallVec::from_slice(inputs),
        }
    }
}

impl Operation for Phi {
    const OPCODE: Opcode = Opcode::Phi;

    fn inputs(&self) -> &[OpIndex] {
        &self.inputs
    }

    fn read(view: &OperationView<'_>) -> Self {
        Phi {
            inputs: view.inputs().collect(),
        }
    }
}

/// Placeholder for a loop phi, emitted at the top of a loop header before
/// the back-edge value exists.
///
/// It is sized so that a two-input [`Phi`] always fits in its run, which is
/// what lets the final phi be written over it by bounded replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingLoopPhi {
    pub inputs: [OpIndex; 1],
    /// Loop variable this phi carries; selects the back-edge value when the
    /// loop is closed.
    pub variable: u32,
}

impl PendingLoopPhi {
    pub fn new(first: OpIndex, variable: u32) -> Self {
        PendingLoopPhi {
            inputs: [first],
            variable,
        }
    }

    /// Value flowing in from the loop entry.
    pub fn first(&self) -> OpIndex {
        self.inputs[0]
    }
}

impl Operation for PendingLoopPhi {
    const OPCODE: Opcode = Opcode::PendingLoopPhi;

    fn inputs(&self) -> &[OpIndex] {
        &self.inputs
    }

    fn payload_len(&self) -> usize {
        1
    }

    fn write_payload(&self, payload: &mut [Slot]) {
        payload[0] = self.variable as Slot;
    }

    fn read(view: &OperationView<'_>) -> Self {
        PendingLoopPhi {
            inputs: [view.input(0)],
            variable: view.payload()[0] as u32,
        }
    }
}

// =============================================================================
// Block Terminators
// =============================================================================

/// Unconditional jump to `destination`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Goto {
    pub destination: BlockId,
}

impl Goto {
    pub fn new(destination: BlockId) -> Self {
        Goto { destination }
    }
}

impl Operation for Goto {
    const OPCODE: Opcode = Opcode::Goto;

    fn inputs(&self) -> &[OpIndex] {
        &[]
    }

    fn payload_len(&self) -> usize {
        1
    }

    fn write_payload(&self, payload: &mut [Slot]) {
        payload[0] = self.destination.index() as Slot;
    }

    fn read(view: &OperationView<'_>) -> Self {
        Goto {
            destination: BlockId::new(view.payload()[0] as u32),
        }
    }
}

/// Jump to `if_true` or `if_false` depending on `condition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Branch {
    pub inputs: [OpIndex; 1],
    pub if_true: BlockId,
    pub if_false: BlockId,
}

impl Branch {
    pub fn new(condition: OpIndex, if_true: BlockId, if_false: BlockId) -> Self {
        Branch {
            inputs: [condition],
            if_true,
            if_false,
        }
    }

    pub fn condition(&self) -> OpIndex {
        self.inputs[0]
    }
}

impl Operation for Branch {
    const OPCODE: Opcode = Opcode::Branch;

    fn inputs(&self) -> &[OpIndex] {
        &self.inputs
    }

    fn payload_len(&self) -> usize {
        1
    }

    fn write_payload(&self, payload: &mut [Slot]) {
        payload[0] = self.if_true.index() as Slot | (self.if_false.index() as Slot) << 32;
    }

    fn read(view: &OperationView<'_>) -> Self {
        let packed = view.payload()[0];
        Branch {
            inputs: [view.input(0)],
            if_true: BlockId::new(packed as u32),
            if_false: BlockId::new((packed >> 32) as u32),
        }
    }
}

/// Return `value` to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Return {
    pub inputs: [OpIndex; 1],
}

impl Return {
    pub fn new(value: OpIndex) -> Self {
        Return { inputs: [value] }
    }

    pub fn value(&self) -> OpIndex {
        self.inputs[0]
    }
}

impl Operation for Return {
    const OPCODE: Opcode = Opcode::Return;

    fn inputs(&self) -> &[OpIndex] {
        &self.inputs
    }

    fn read(view: &OperationView<'_>) -> Self {
        Return {
            inputs: [view.input(0)],
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
