//! Function symbols from an ELF image.
//!
//! Divergence reports carry only addresses. Loading the guest program's ELF lets the
//! caller name the function that was executing when the machines disagreed.

use std::path::Path;

use object::{Object, ObjectSymbol, SymbolKind};
use serde::Serialize;
use tracing::debug;

use crate::common::Result;

/// One function symbol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Function {
    /// Symbol name.
    pub name: String,
    /// First address of the function.
    pub start: u64,
    /// Size in bytes.
    pub size: u64,
}

impl Function {
    /// Returns `true` if `addr` lies inside the function.
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr - self.start < self.size
    }
}

/// Function symbols sorted by start address.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FunctionTable {
    funcs: Vec<Function>,
}

impl FunctionTable {
    /// Builds a table from explicit entries. Zero-sized entries are dropped.
    pub fn from_functions(funcs: impl IntoIterator<Item = Function>) -> Self {
        let mut funcs: Vec<Function> = funcs.into_iter().filter(|f| f.size > 0).collect();
        funcs.sort_by_key(|f| f.start);
        Self { funcs }
    }

    /// Reads the function symbols of an ELF image.
    ///
    /// # Errors
    ///
    /// Returns [`DifftestError::Symbols`](crate::DifftestError::Symbols) if the bytes are
    /// not a readable object file.
    pub fn from_elf_bytes(bytes: &[u8]) -> Result<Self> {
        // object reads headers in place and rejects misaligned input.
        let copy: Vec<u8>;
        let data = if bytes.as_ptr().align_offset(8) == 0 {
            bytes
        } else {
            copy = bytes.to_vec();
            &copy
        };

        let file = object::File::parse(data)?;
        let mut funcs = Vec::new();
        for sym in file.symbols() {
            if sym.kind() != SymbolKind::Text || sym.size() == 0 {
                continue;
            }
            let Ok(name) = sym.name() else { continue };
            funcs.push(Function {
                name: name.to_string(),
                start: sym.address(),
                size: sym.size(),
            });
        }
        let table = Self::from_functions(funcs);
        debug!(functions = table.len(), "loaded function symbols");
        Ok(table)
    }

    /// Reads the function symbols of the ELF file at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed.
    pub fn from_elf_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_elf_bytes(&bytes)
    }

    /// Finds the function containing `addr`.
    pub fn lookup(&self, addr: u64) -> Option<&Function> {
        let idx = self.funcs.partition_point(|f| f.start <= addr);
        self.funcs[..idx].iter().rev().find(|f| f.contains(addr))
    }

    /// Number of functions.
    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    /// Returns `true` if the table holds no functions.
    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }

    /// Iterates functions in address order.
    pub fn iter(&self) -> impl Iterator<Item = &Function> {
        self.funcs.iter()
    }
}
