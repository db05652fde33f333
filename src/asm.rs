//! Assembling assembly source ASTs into object files.
//!
//! This module is used to convert source ASTs (`Vec<`[`Stmt`]`>`) into
//! object files that can be executed by the simulator.
//!
//! The assembler module notably consists of:
//! - [`assemble`]: The main function which assembles the statements into an object file.
//! - [`SymbolTable`]: a struct holding the label-to-address mapping computed by the first assembler pass.
//! - [`ObjectFile`]: a struct holding the object file, which can be loaded into the simulator and executed.
//!
//! [`Stmt`]: crate::ast::asm::Stmt

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::ast::asm::{AsmInstr, Stmt};
use crate::ast::sim::{BranchInstr, MoveInstr, ShiftDir, SimInstr};
use crate::ast::{BranchTarget, Label, Literal};
use crate::err::ErrSpan;
use crate::sim::mem::CODE_SIZE;

/// Assembles an assembly source code AST into an object file.
///
/// This runs both assembler passes: the first walks the statements to
/// assign addresses and collect labels (see [`SymbolTable`]), the second
/// encodes each instruction, resolving label operands against the table.
///
/// # Example
/// ```
/// use cb16::parse::parse_program;
/// use cb16::asm::assemble;
///
/// let src = "
///     LOOP: ADD R1, #1
///     BNE R1, LOOP
/// ";
/// let ast = parse_program(src).unwrap();
///
/// let obj = assemble(ast).unwrap();
/// assert_eq!(obj.len(), 2);
/// ```
pub fn assemble(ast: Vec<Stmt>) -> Result<ObjectFile, AsmErr> {
    let sym = SymbolTable::new(&ast)?;
    ObjectFile::new(ast, &sym)
}

/// Kinds of errors that can occur from assembling given assembly code.
///
/// See [`AsmErr`] for this error type with span information included.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum AsmErrKind {
    /// There were multiple labels of the same name at different addresses (pass 1).
    OverlappingLabels,
    /// The program does not fit in code memory (pass 1).
    ProgramTooBig,
    /// A branch's label resolves to an offset outside the literal field (pass 2).
    BranchOutOfRange,
    /// Label did not have an assigned address (pass 2).
    CouldNotFindLabel,
}
impl std::fmt::Display for AsmErrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OverlappingLabels => f.write_str("label was defined multiple times"),
            Self::ProgramTooBig     => f.write_str("program does not fit in code memory"),
            Self::BranchOutOfRange  => f.write_str("branch target is out of range"),
            Self::CouldNotFindLabel => f.write_str("label could not be found"),
        }
    }
}

/// Error from assembling given assembly code.
#[derive(Debug)]
pub struct AsmErr {
    /// The kind of error.
    pub kind: AsmErrKind,
    /// The span in the source associated with this error.
    pub span: ErrSpan
}
impl AsmErr {
    /// Creates a new [`AsmErr`].
    pub fn new<E: Into<ErrSpan>>(kind: AsmErrKind, span: E) -> Self {
        AsmErr { kind, span: span.into() }
    }
}
impl std::fmt::Display for AsmErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind.fmt(f)
    }
}
impl std::error::Error for AsmErr {}
impl crate::err::Error for AsmErr {
    fn span(&self) -> Option<ErrSpan> {
        Some(self.span.clone())
    }

    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match &self.kind {
            AsmErrKind::OverlappingLabels => Some("labels must be unique within a file, try renaming one of the labels".into()),
            AsmErrKind::ProgramTooBig     => Some(format!("code memory holds {CODE_SIZE} instructions").into()),
            AsmErrKind::BranchOutOfRange  => Some(format!("conditional branches reach at most {} instructions forward or {} back", Literal::MAX, -(Literal::MIN as i32)).into()),
            AsmErrKind::CouldNotFindLabel => Some("try adding this label before an instruction".into()),
        }
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Default, Debug)]
struct SymbolData {
    addr: u16,
    src_start: usize,
}
impl SymbolData {
    /// Calculates the source range of this symbol, given the name of the label.
    fn span(&self, label: &str) -> std::ops::Range<usize> {
        self.src_start .. (self.src_start + label.len())
    }
}

/// The symbol table created in the first assembler pass, mapping source
/// code labels (case-insensitively) to instruction addresses.
///
/// The table only lives for the duration of assembly; it is not part of
/// the resulting [`ObjectFile`].
#[derive(PartialEq, Eq, Clone)]
pub struct SymbolTable {
    /// A mapping from label to address and span of the label.
    label_map: HashMap<String, SymbolData>,
}

impl SymbolTable {
    /// Creates a new symbol table.
    ///
    /// This performs the first assembler pass, walking the statements in
    /// order and assigning each one a word address (0, 1, 2, ...). The
    /// labels attached to a statement name that statement's address.
    ///
    /// ## Example
    /// ```
    /// use cb16::parse::parse_program;
    /// use cb16::asm::SymbolTable;
    ///
    /// let src = "
    ///     MOVE R1, #10
    ///     LOOP: SUB R1, #1
    ///     BNE R1, LOOP
    /// ";
    /// let ast = parse_program(src).unwrap();
    ///
    /// let sym = SymbolTable::new(&ast).unwrap();
    /// assert_eq!(sym.lookup_label("LOOP"), Some(1));
    /// assert_eq!(sym.lookup_label("loop"), Some(1));
    /// assert_eq!(sym.lookup_label("ELSEWHERE"), None);
    /// ```
    pub fn new(stmts: &[Stmt]) -> Result<Self, AsmErr> {
        fn add_label(
            labels: &mut HashMap<String, SymbolData>,
            label: &Label,
            addr: u16,
        ) -> Result<(), AsmErr> {
            match labels.entry(label.name.to_uppercase()) {
                // Two labels with different addresses. Conflict.
                Entry::Occupied(e) if e.get().addr != addr => {
                    let span1 = e.get().span(e.key());
                    let span2 = label.span();
                    Err(AsmErr::new(AsmErrKind::OverlappingLabels, [span1, span2]))
                },
                // Two labels with same address. No conflict.
                Entry::Occupied(_) => Ok(()),
                // New label.
                Entry::Vacant(e) => {
                    e.insert(SymbolData { addr, src_start: label.span().start });
                    Ok(())
                }
            }
        }

        let mut label_map = HashMap::new();

        for (addr, stmt) in stmts.iter().enumerate() {
            if addr >= CODE_SIZE {
                return Err(AsmErr::new(AsmErrKind::ProgramTooBig, stmt.span.clone()));
            }

            for label in &stmt.labels {
                add_label(&mut label_map, label, addr as u16)?;
            }
        }

        Ok(SymbolTable { label_map })
    }

    /// Gets the instruction address of a given label (if it exists).
    ///
    /// Lookup is case-insensitive, matching label definition.
    pub fn lookup_label(&self, label: &str) -> Option<u16> {
        self.label_map.get(&label.to_uppercase()).map(|sym_data| sym_data.addr)
    }

    /// Gets the label at a given instruction address (if one exists).
    pub fn rev_lookup_label(&self, addr: u16) -> Option<&str> {
        let (label, _) = self.label_map.iter()
            .find(|&(_, sym_data)| sym_data.addr == addr)?;

        Some(label)
    }

    /// Gets an iterable of the mapping from labels to addresses.
    pub fn label_iter(&self) -> impl Iterator<Item=(&str, u16)> + '_ {
        self.label_map.iter()
            .map(|(label, sym_data)| (&**label, sym_data.addr))
    }
}
impl std::fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.label_map.iter().map(|(k, data)| (k, data.addr)))
            .finish()
    }
}

/// Resolves a branch target into an offset relative to the branch's own
/// address.
///
/// The machine's branch arithmetic subtracts one and the write-back
/// increment adds it back, so an offset of `k` lands `k` instructions
/// away from the branch itself.
fn resolve_target(target: BranchTarget, addr: u16, sym: &SymbolTable) -> Result<Literal, AsmErr> {
    match target {
        BranchTarget::Offset(off) => Ok(off),
        BranchTarget::Label(label) => {
            let Some(dest) = sym.lookup_label(&label.name) else {
                return Err(AsmErr::new(AsmErrKind::CouldNotFindLabel, label.span()));
            };

            Literal::new(dest.wrapping_sub(addr) as i16)
                .ok_or_else(|| AsmErr::new(AsmErrKind::BranchOutOfRange, label.span()))
        },
    }
}

impl AsmInstr {
    /// Converts an ASM instruction into a simulator instruction ([`SimInstr`])
    /// by resolving label operands.
    ///
    /// Parameters:
    /// - `addr`: the address of this instruction
    /// - `sym`: the symbol table
    pub fn into_sim_instr(self, addr: u16, sym: &SymbolTable) -> Result<SimInstr, AsmErr> {
        match self {
            AsmInstr::Arith(op, r1, src) => Ok(SimInstr::Arith(op, r1, src)),
            AsmInstr::Shr(r1)            => Ok(SimInstr::Shift(r1, ShiftDir::Right)),
            AsmInstr::Shl(r1)            => Ok(SimInstr::Shift(r1, ShiftDir::Left)),
            AsmInstr::MoveImm(r1, imm)   => Ok(SimInstr::Move(MoveInstr::Imm(r1, imm))),
            AsmInstr::MoveFromMem(r1, r2) => Ok(SimInstr::Move(MoveInstr::FromMem(r1, r2))),
            AsmInstr::MoveToMem(r1, r2)  => Ok(SimInstr::Move(MoveInstr::ToMem(r1, r2))),
            AsmInstr::Jump(r1)           => Ok(SimInstr::Branch(BranchInstr::Jump(r1))),
            AsmInstr::Br(cc, r1, target) => Ok(SimInstr::Branch(BranchInstr::Cond(cc, r1, resolve_target(target, addr, sym)?))),
        }
    }
}

/// An object file.
///
/// This is the final product after assembly source code is fully
/// assembled. Its on-disk form ([`ObjectFile::to_bytes`]) is the raw
/// instruction stream, one big-endian word pair per instruction, with no
/// header: exactly what the simulator's code loader consumes.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ObjectFile {
    /// The encoded instructions, in address order starting from 0.
    words: Vec<u16>,
}
impl ObjectFile {
    /// Creates a new object file from an assembly AST and a symbol table.
    ///
    /// This is the second assembler pass: every statement is lowered to a
    /// [`SimInstr`] (resolving labels) and encoded.
    fn new(ast: Vec<Stmt>, sym: &SymbolTable) -> Result<Self, AsmErr> {
        let words = ast.into_iter()
            .enumerate()
            .map(|(addr, stmt)| {
                stmt.instr
                    .into_sim_instr(addr as u16, sym)
                    .map(|instr| instr.encode())
            })
            .collect::<Result<_, _>>()?;

        Ok(Self { words })
    }

    /// The encoded instruction words, in address order.
    pub fn words(&self) -> &[u16] {
        &self.words
    }

    /// The number of instructions in the object file.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the object file holds no instructions.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Serializes into the on-disk format: the raw big-endian byte stream.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.words.iter()
            .flat_map(|&w| w.to_be_bytes())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::reg_consts::{R1, R2};
    use crate::ast::sim::{ArithOp, BranchCond};
    use crate::ast::ImmOrReg;
    use crate::parse::parse_program;

    fn assemble_src(src: &str) -> Result<ObjectFile, AsmErr> {
        let ast = parse_program(src).unwrap();
        assemble(ast)
    }
    fn assert_asm_fail<T: std::fmt::Debug>(r: Result<T, AsmErr>, kind: AsmErrKind) {
        assert_eq!(r.unwrap_err().kind, kind);
    }

    #[test]
    fn test_sym_basic() {
        let src = "
            A: ADD R0, #0
            AND R0, #1
            C: ADD R0, #0
            D: MOVE R0, [R1]
            SHL R0
            SHL R0
            E: BNE R0, A
            B: JUMP R1
        ";

        let ast = parse_program(src).unwrap();
        let sym = SymbolTable::new(&ast).unwrap();
        assert_eq!(sym.lookup_label("A"), Some(0));
        assert_eq!(sym.lookup_label("C"), Some(2));
        assert_eq!(sym.lookup_label("D"), Some(3));
        assert_eq!(sym.lookup_label("E"), Some(6));
        assert_eq!(sym.lookup_label("B"), Some(7));
        assert_eq!(sym.rev_lookup_label(3), Some("D"));
    }

    #[test]
    fn test_duplicate_labels() {
        let src = "
            LOOP: ADD R1, #1
            LOOP: SUB R1, #1
            BNE R1, LOOP
        ";
        assert_asm_fail(assemble_src(src), AsmErrKind::OverlappingLabels);

        // two labels for the same address are fine
        let src = "
            TOP:
            BEGIN: ADD R1, #1
            BNE R1, TOP
        ";
        assemble_src(src).unwrap();
    }

    #[test]
    fn test_undefined_label() {
        let src = "BEQ R1, NOWHERE";
        assert_asm_fail(assemble_src(src), AsmErrKind::CouldNotFindLabel);
    }

    #[test]
    fn test_branch_offsets() {
        // the offset is target - branch address
        let src = "
            LOOP: ADD R1, #1
            ADD R2, #2
            BNE R1, LOOP
            BEQ R1, DONE
            DONE: SUB R1, #1
        ";
        let obj = assemble_src(src).unwrap();

        let branches: Vec<_> = obj.words().iter()
            .map(|&w| SimInstr::decode(w).unwrap())
            .filter_map(|i| match i {
                SimInstr::Branch(BranchInstr::Cond(cc, _, off)) => Some((cc, off.get())),
                _ => None,
            })
            .collect();

        assert_eq!(branches, vec![
            (BranchCond::Ne, -2), // addr 2 -> 0
            (BranchCond::Eq, 1),  // addr 3 -> 4
        ]);
    }

    #[test]
    fn test_branch_offset_out_of_range() {
        // a label 40 instructions away cannot fit the 6-bit offset
        let mut src = String::from("LOOP: ADD R1, #1\n");
        for _ in 0..40 {
            src.push_str("ADD R2, #1\n");
        }
        src.push_str("BNE R1, LOOP\n");

        assert_asm_fail(assemble_src(&src), AsmErrKind::BranchOutOfRange);
    }

    #[test]
    fn test_program_too_big() {
        let src = "ADD R1, #1\n".repeat(CODE_SIZE + 1);
        assert_asm_fail(assemble_src(&src), AsmErrKind::ProgramTooBig);

        let src = "ADD R1, #1\n".repeat(CODE_SIZE);
        assemble_src(&src).unwrap();
    }

    #[test]
    fn test_object_bytes_big_endian() {
        let obj = assemble_src("ADD R1, #-1").unwrap();
        // opcode 0, mode 0, r1 = 1, imm = 111111
        assert_eq!(obj.words(), &[0b000_000_0001_111111]);
        assert_eq!(obj.to_bytes(), vec![0b0000_0000, 0b0111_1111]);
    }

    #[test]
    fn test_assemble_then_decode_preserves_stream() {
        // every surface form survives assemble -> decode
        let src = "
            ADD R1, R2
            SUB R1, #-3
            AND R2, #15
            OR R2, R1
            XOR R1, R1
            SHR R3
            SHL R3
            MOVE R1, #10
            MOVE R2, [R1]
            MOVE [R1], R2
            JUMP R1
            HERE: BEQ R1, HERE
            BGE R2, #-1
        ";
        let ast = parse_program(src).unwrap();
        let expected: Vec<SimInstr> = {
            let sym = SymbolTable::new(&ast).unwrap();
            ast.iter().cloned()
                .enumerate()
                .map(|(addr, stmt)| stmt.instr.into_sim_instr(addr as u16, &sym).unwrap())
                .collect()
        };

        let obj = assemble(ast).unwrap();
        let decoded: Vec<SimInstr> = obj.words().iter()
            .map(|&w| SimInstr::decode(w).unwrap())
            .collect();

        assert_eq!(decoded, expected);
        assert!(matches!(decoded[0], SimInstr::Arith(ArithOp::Add, r1, ImmOrReg::Reg(r2)) if r1 == R1 && r2 == R2));
    }
}
