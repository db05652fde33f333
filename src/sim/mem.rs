//! Memory handling for the CB-16 simulator.
//!
//! This module consists of:
//! - The machine constants (sizes, fill byte, branch limit).
//! - [`CodeMem`]: the instruction memory, read-only at run time.
//! - [`DataMem`]: the data memory, block-grouped for the cache.
//! - [`RegFile`]: the register file.

use crate::ast::Reg;

/// Bytes per machine word.
pub const WORD_SIZE: usize = 2;

/// Words of code memory. The program counter indexes this in word units.
pub const CODE_SIZE: usize = 1024;

/// Number of general-purpose registers.
pub const REGISTERS: usize = 16;

/// Words of data memory that the loaders and the dump operate on.
pub const DATA_WORDS: usize = 1024;

/// The exclusive upper bound of the data addresses the machine accepts.
///
/// The guard is the byte width of the data area even though addresses
/// name words, so the machine accepts addresses up to twice the nominal
/// data size (an ISA quirk). [`DataMem`] backs the whole guarded range, so
/// every accepted address maps to real storage; loaders and dumps stay
/// within the nominal [`DATA_WORDS`].
pub const DATA_SPAN: usize = DATA_WORDS * WORD_SIZE;

/// The byte that fills code and data memory at startup.
///
/// A word of it (`0xFFFF`) decodes as an illegal instruction, so execution
/// that runs off the end of a program halts deterministically.
pub const MEM_FILLER: u8 = 0xFF;

/// Number of counted branches after which the simulator assumes the
/// program is stuck in an infinite loop.
pub const BRANCH_LIMIT: u64 = 1_000_000;

/// Default number of cache entries.
pub const DEFAULT_CACHE_BLOCKS: usize = 1;

/// Default number of words per cache block.
pub const DEFAULT_BLOCK_SIZE: usize = 8;

/// Instruction memory.
///
/// Holds [`CODE_SIZE`] words, pre-filled with [`MEM_FILLER`] bytes. The
/// simulator only reads it; the only write path is loading an object file.
#[derive(Debug, Clone)]
pub struct CodeMem {
    words: Box<[u16; CODE_SIZE]>,
}
impl CodeMem {
    /// Creates code memory filled with the illegal-instruction pattern.
    pub fn new() -> Self {
        Self {
            words: Box::new([u16::from_be_bytes([MEM_FILLER; WORD_SIZE]); CODE_SIZE]),
        }
    }

    /// Copies an object byte stream into code memory.
    ///
    /// Bytes are consumed as big-endian word pairs, starting at address 0.
    /// At most `CODE_SIZE * WORD_SIZE` bytes are consumed; anything beyond
    /// is ignored. Memory past the stream keeps its fill pattern, and a
    /// trailing odd byte lands in the high byte of its word.
    pub fn load_bytes(&mut self, bytes: &[u8]) {
        let bytes = &bytes[..bytes.len().min(CODE_SIZE * WORD_SIZE)];

        for (i, chunk) in bytes.chunks(WORD_SIZE).enumerate() {
            self.words[i] = match *chunk {
                [hi, lo] => u16::from_be_bytes([hi, lo]),
                [hi] => u16::from_be_bytes([hi, MEM_FILLER]),
                _ => unreachable!("chunks are 1 or 2 bytes"),
            };
        }
    }

    /// Reads the instruction word at the given word address, if it is in range.
    pub fn get(&self, addr: u16) -> Option<u16> {
        self.words.get(usize::from(addr)).copied()
    }
}
impl Default for CodeMem {
    fn default() -> Self {
        Self::new()
    }
}

/// An error from loading the data-memory hex format.
///
/// The format is plain text: each line holds zero or more groups of 4 hex
/// digits (whitespace-separated or run together in multiples of four),
/// each group one big-endian word.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct HexLoadErr {
    /// The 0-indexed line the malformed group appeared on.
    pub line: usize,
    /// The malformed group.
    pub group: String,
}
impl std::fmt::Display for HexLoadErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {:?} is not a group of 4-digit hex words", self.line + 1, self.group)
    }
}
impl std::error::Error for HexLoadErr {}
impl crate::err::Error for HexLoadErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        Some("each word is 4 hex digits, e.g. 002A; groups are separated by whitespace".into())
    }
}

/// Data memory.
///
/// A flat store of words, pre-filled with [`MEM_FILLER`] bytes and grouped
/// into blocks by the cache (a block is `block_size` consecutive words
/// starting at `tag * block_size`). The store spans the full guarded
/// address range ([`DATA_SPAN`] words); see [`DATA_SPAN`] for the quirk.
///
/// The simulator never touches this directly during execution; all
/// instruction-level traffic goes through the cache.
#[derive(Debug, Clone)]
pub struct DataMem {
    words: Box<[u16]>,
}
impl DataMem {
    /// Creates data memory filled with the fill pattern.
    pub fn new() -> Self {
        Self {
            words: vec![u16::from_be_bytes([MEM_FILLER; WORD_SIZE]); DATA_SPAN].into_boxed_slice(),
        }
    }

    /// Parses the hex data format and loads it starting at address 0.
    ///
    /// Words past [`DATA_WORDS`] are dropped with a warning. Returns the
    /// number of words loaded.
    pub fn load_hex(&mut self, src: &str) -> Result<usize, HexLoadErr> {
        let mut index = 0;

        for (lno, line) in src.lines().enumerate() {
            for group in line.split_whitespace() {
                if group.len() % 4 != 0 || !group.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(HexLoadErr { line: lno, group: group.to_string() });
                }

                for word_hex in group.as_bytes().chunks(4) {
                    if index >= DATA_WORDS {
                        tracing::warn!("data exceeds memory size, dropping words past {DATA_WORDS}");
                        return Ok(index);
                    }

                    let text = std::str::from_utf8(word_hex).unwrap_or_else(|_| unreachable!("chunk of ASCII hex digits"));
                    self.words[index] = u16::from_str_radix(text, 16)
                        .unwrap_or_else(|_| unreachable!("4 hex digits always fit a u16"));
                    index += 1;
                }
            }
        }

        Ok(index)
    }

    /// Reads the word at the given word address.
    ///
    /// This is a state query; simulated accesses go through the cache.
    pub fn get(&self, addr: u16) -> u16 {
        self.words[usize::from(addr)]
    }

    /// Writes the word at the given word address.
    ///
    /// This is a state edit; simulated accesses go through the cache.
    pub fn set(&mut self, addr: u16, word: u16) {
        self.words[usize::from(addr)] = word;
    }

    /// The block of `block_size` words identified by `tag`.
    pub(crate) fn block(&self, tag: u16, block_size: usize) -> &[u16] {
        let start = usize::from(tag) * block_size;
        &self.words[start..start + block_size]
    }

    /// Mutable view of the block identified by `tag`.
    pub(crate) fn block_mut(&mut self, tag: u16, block_size: usize) -> &mut [u16] {
        let start = usize::from(tag) * block_size;
        &mut self.words[start..start + block_size]
    }

    /// Formats the nominal data memory as a hex + ASCII dump.
    ///
    /// Each line holds 16 words (32 bytes) followed by their ASCII
    /// rendering, with non-printable bytes shown as `.`:
    ///
    /// ```text
    /// 0048 6921 ffff ...    'Hi!.....'
    /// ```
    pub fn hex_dump(&self) -> String {
        use std::fmt::Write;

        const WORDS_PER_LINE: usize = 16;

        fn valid_ascii(byte: u8) -> char {
            match (0x21..=0x7E).contains(&byte) {
                true  => char::from(byte),
                false => '.',
            }
        }

        let mut buf = String::new();
        for row in self.words[..DATA_WORDS].chunks(WORDS_PER_LINE) {
            let mut text = String::with_capacity(WORDS_PER_LINE * WORD_SIZE);
            for &word in row {
                let [hi, lo] = word.to_be_bytes();
                let _ = write!(buf, "{hi:02x}{lo:02x} ");
                text.push(valid_ascii(hi));
                text.push(valid_ascii(lo));
            }
            let _ = writeln!(buf, "\t'{text}'");
        }

        buf
    }
}
impl Default for DataMem {
    fn default() -> Self {
        Self::new()
    }
}

/// The register file.
///
/// This struct can be indexed with a [`Reg`]
/// (which can be constructed using the [`crate::ast::reg_consts`] module or via [`Reg::new`]).
/// All registers start at zero.
///
/// # Example
///
/// ```
/// use cb16::sim::mem::RegFile;
/// use cb16::ast::reg_consts::R0;
///
/// let mut reg = RegFile::new();
/// reg[R0] = 11;
/// assert_eq!(reg[R0], 11);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RegFile([u16; REGISTERS]);
impl RegFile {
    /// Creates a register file with all registers zeroed.
    pub fn new() -> Self {
        Self::default()
    }
}
impl std::ops::Index<Reg> for RegFile {
    type Output = u16;

    fn index(&self, index: Reg) -> &Self::Output {
        &self.0[usize::from(index)]
    }
}
impl std::ops::IndexMut<Reg> for RegFile {
    fn index_mut(&mut self, index: Reg) -> &mut Self::Output {
        &mut self.0[usize::from(index)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_fill_and_load() {
        let mut code = CodeMem::new();
        assert_eq!(code.get(0), Some(0xFFFF));
        assert_eq!(code.get((CODE_SIZE - 1) as u16), Some(0xFFFF));
        assert_eq!(code.get(CODE_SIZE as u16), None);

        code.load_bytes(&[0x12, 0x34, 0x56]);
        assert_eq!(code.get(0), Some(0x1234));
        // trailing odd byte merges with the fill pattern
        assert_eq!(code.get(1), Some(0x56FF));
        assert_eq!(code.get(2), Some(0xFFFF));
    }

    #[test]
    fn test_code_load_truncates() {
        let mut code = CodeMem::new();
        let bytes = vec![0xAB; CODE_SIZE * WORD_SIZE + 10];
        code.load_bytes(&bytes);
        assert_eq!(code.get((CODE_SIZE - 1) as u16), Some(0xABAB));
        assert_eq!(code.get(CODE_SIZE as u16), None);
    }

    #[test]
    fn test_hex_load() {
        let mut data = DataMem::new();
        let n = data.load_hex("0048 6921\nffff00ff\n").unwrap();
        assert_eq!(n, 4);
        assert_eq!(data.get(0), 0x0048);
        assert_eq!(data.get(1), 0x6921);
        assert_eq!(data.get(2), 0xFFFF);
        assert_eq!(data.get(3), 0x00FF);
        assert_eq!(data.get(4), 0xFFFF); // untouched fill
    }

    #[test]
    fn test_hex_load_rejects_malformed() {
        let mut data = DataMem::new();
        let err = data.load_hex("0048\n12g4\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert_eq!(err.group, "12g4");

        let err = data.load_hex("123").unwrap_err();
        assert_eq!(err.group, "123");
    }

    #[test]
    fn test_hex_load_drops_overflow() {
        let mut data = DataMem::new();
        let line = "0001 ".repeat(DATA_WORDS + 5);
        let n = data.load_hex(&line).unwrap();
        assert_eq!(n, DATA_WORDS);
    }

    #[test]
    fn test_hex_dump_shape() {
        let mut data = DataMem::new();
        data.set(0, 0x4869); // "Hi"
        let dump = data.hex_dump();
        let first = dump.lines().next().unwrap();
        assert!(first.starts_with("4869 ffff "));
        assert!(first.ends_with("'Hi..............................'"));
        assert_eq!(dump.lines().count(), DATA_WORDS / 16);
    }
}
