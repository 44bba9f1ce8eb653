//! # Symbol Table Tests
//!
//! Function lookup over a minimal hand-assembled ELF32 image.

use std::io::Write;

use difftest_core::symbols::Function;
use difftest_core::{DifftestError, FunctionTable};
use pretty_assertions::assert_eq;

const STT_FUNC_GLOBAL: u8 = 0x12;
const STT_OBJECT_GLOBAL: u8 = 0x11;

struct Sym {
    name: &'static str,
    value: u32,
    size: u32,
    info: u8,
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn align4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

/// Assembles a RISC-V ELF32 executable with a `.text` section and the given symbols.
///
/// Sections: null, `.text` (no file data), `.symtab`, `.strtab`, `.shstrtab`.
fn elf32(syms: &[Sym]) -> Vec<u8> {
    let mut strtab = vec![0u8];
    let mut name_offsets = Vec::new();
    for sym in syms {
        name_offsets.push(strtab.len() as u32);
        strtab.extend_from_slice(sym.name.as_bytes());
        strtab.push(0);
    }
    let shstrtab = b"\0.text\0.symtab\0.strtab\0.shstrtab\0";

    let mut out = vec![0u8; 52];
    let strtab_off = out.len() as u32;
    out.extend_from_slice(&strtab);
    let shstrtab_off = out.len() as u32;
    out.extend_from_slice(shstrtab);
    align4(&mut out);

    let symtab_off = out.len() as u32;
    out.extend_from_slice(&[0u8; 16]);
    for (sym, name) in syms.iter().zip(&name_offsets) {
        push_u32(&mut out, *name);
        push_u32(&mut out, sym.value);
        push_u32(&mut out, sym.size);
        out.push(sym.info);
        out.push(0);
        push_u16(&mut out, 1);
    }
    let symtab_size = out.len() as u32 - symtab_off;
    align4(&mut out);

    let shoff = out.len() as u32;
    // (name, type, flags, addr, offset, size, link, info, align, entsize)
    let sections: [[u32; 10]; 5] = [
        [0; 10],
        [1, 8, 0x6, 0x8000_0000, 0, 0x1000, 0, 0, 4, 0],
        [7, 2, 0, 0, symtab_off, symtab_size, 3, 1, 4, 16],
        [15, 3, 0, 0, strtab_off, strtab.len() as u32, 0, 0, 1, 0],
        [23, 3, 0, 0, shstrtab_off, shstrtab.len() as u32, 0, 0, 1, 0],
    ];
    for header in &sections {
        for field in header {
            push_u32(&mut out, *field);
        }
    }

    let mut ehdr = vec![0x7f, b'E', b'L', b'F', 1, 1, 1, 0];
    ehdr.extend_from_slice(&[0u8; 8]);
    push_u16(&mut ehdr, 2);
    push_u16(&mut ehdr, 0xf3);
    push_u32(&mut ehdr, 1);
    push_u32(&mut ehdr, 0x8000_0000);
    push_u32(&mut ehdr, 0);
    push_u32(&mut ehdr, shoff);
    push_u32(&mut ehdr, 0);
    push_u16(&mut ehdr, 52);
    push_u16(&mut ehdr, 32);
    push_u16(&mut ehdr, 0);
    push_u16(&mut ehdr, 40);
    push_u16(&mut ehdr, 5);
    push_u16(&mut ehdr, 4);
    out[..52].copy_from_slice(&ehdr);
    out
}

fn sample_image() -> Vec<u8> {
    elf32(&[
        Sym { name: "helper", value: 0x8000_0040, size: 0x10, info: STT_FUNC_GLOBAL },
        Sym { name: "main", value: 0x8000_0000, size: 0x20, info: STT_FUNC_GLOBAL },
        Sym { name: "marker", value: 0x8000_0030, size: 0, info: STT_FUNC_GLOBAL },
        Sym { name: "table", value: 0x8000_0080, size: 0x40, info: STT_OBJECT_GLOBAL },
    ])
}

#[test]
fn test_reads_sized_functions_in_address_order() {
    let table = FunctionTable::from_elf_bytes(&sample_image()).unwrap();
    let names: Vec<&str> = table.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["main", "helper"]);
    assert_eq!(table.len(), 2);
}

#[test]
fn test_lookup_respects_function_bounds() {
    let table = FunctionTable::from_elf_bytes(&sample_image()).unwrap();

    assert_eq!(table.lookup(0x8000_0000).map(|f| f.name.as_str()), Some("main"));
    assert_eq!(table.lookup(0x8000_001f).map(|f| f.name.as_str()), Some("main"));
    assert_eq!(table.lookup(0x8000_0020), None);
    assert_eq!(table.lookup(0x8000_0044).map(|f| f.name.as_str()), Some("helper"));
    assert_eq!(table.lookup(0x7fff_fffc), None);
    assert_eq!(table.lookup(0x8000_0090), None);
}

#[test]
fn test_misaligned_input_is_accepted() {
    let image = sample_image();
    let mut shifted = vec![0u8; 1];
    shifted.extend_from_slice(&image);
    let table = FunctionTable::from_elf_bytes(&shifted[1..]).unwrap();
    assert_eq!(table.len(), 2);
}

#[test]
fn test_garbage_is_a_symbols_error() {
    let err = FunctionTable::from_elf_bytes(b"definitely not an object file").unwrap_err();
    assert!(matches!(err, DifftestError::Symbols(_)), "{err}");
}

#[test]
fn test_from_elf_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&sample_image()).unwrap();
    file.flush().unwrap();

    let table = FunctionTable::from_elf_file(file.path()).unwrap();
    assert_eq!(table.lookup(0x8000_0048).map(|f| f.start), Some(0x8000_0040));

    let missing = file.path().with_extension("missing");
    assert!(matches!(
        FunctionTable::from_elf_file(&missing).unwrap_err(),
        DifftestError::Io(_)
    ));
}

#[test]
fn test_nested_functions_prefer_innermost() {
    let table = FunctionTable::from_functions([
        Function { name: "outer".into(), start: 0x0, size: 0x100 },
        Function { name: "inner".into(), start: 0x10, size: 0x10 },
        Function { name: "empty".into(), start: 0x50, size: 0 },
    ]);
    assert_eq!(table.len(), 2);
    assert_eq!(table.lookup(0x18).map(|f| f.name.as_str()), Some("inner"));
    assert_eq!(table.lookup(0x30).map(|f| f.name.as_str()), Some("outer"));
    assert!(FunctionTable::default().is_empty());
}
