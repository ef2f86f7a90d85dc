//! Section readers and the top-level single-pass module parser.
//!
//! Sections must appear in ascending id order with no duplicates (custom
//! sections excepted); every payload must be consumed exactly.

use log::debug;

use super::{cursor::Cursor, leb128, DecodeError, Result};
use crate::module::{
    CodeBody, ConstExpr, DataSegment, ElementSegment, Global, LocalDecl, Module,
};
use crate::types::{
    Export, ExportDesc, FuncType, GlobalType, Import, ImportDesc, Limits, MemoryType, RefType,
    TableType, ValType,
};

const MAGIC: u32 = 0x6D73_6100; // "\0asm" little-endian
const VERSION: u32 = 0x0000_0001;

/// Hard cap on declared locals per function; guards against pathological
/// count immediates before any allocation happens.
const MAX_LOCALS: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionId {
    Custom = 0,
    Type = 1,
    Import = 2,
    Function = 3,
    Table = 4,
    Memory = 5,
    Global = 6,
    Export = 7,
    Start = 8,
    Element = 9,
    Code = 10,
    Data = 11,
}

impl SectionId {
    fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0 => SectionId::Custom,
            1 => SectionId::Type,
            2 => SectionId::Import,
            3 => SectionId::Function,
            4 => SectionId::Table,
            5 => SectionId::Memory,
            6 => SectionId::Global,
            7 => SectionId::Export,
            8 => SectionId::Start,
            9 => SectionId::Element,
            10 => SectionId::Code,
            11 => SectionId::Data,
            _ => return None,
        })
    }
}

fn read_vec<T>(cur: &mut Cursor, mut elem: impl FnMut(&mut Cursor) -> Result<T>) -> Result<Vec<T>> {
    let len = leb128::read_u32(cur)? as usize;
    let mut out = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        out.push(elem(cur)?);
    }
    Ok(out)
}

fn read_val_type(cur: &mut Cursor) -> Result<ValType> {
    match cur.read_u8()? {
        0x7F => Ok(ValType::I32),
        0x7E => Ok(ValType::I64),
        0x7D => Ok(ValType::F32),
        0x7C => Ok(ValType::F64),
        _ => Err(DecodeError::Malformed {
            offset: cur.offset(),
            msg: "invalid value type",
        }),
    }
}

fn read_limits(cur: &mut Cursor) -> Result<Limits> {
    match cur.read_u8()? {
        0x00 => Ok(Limits::new(leb128::read_u32(cur)?, None)),
        0x01 => {
            let min = leb128::read_u32(cur)?;
            let max = leb128::read_u32(cur)?;
            if max < min {
                return Err(DecodeError::Malformed {
                    offset: cur.offset(),
                    msg: "limits maximum below minimum",
                });
            }
            Ok(Limits::new(min, Some(max)))
        }
        _ => Err(DecodeError::Malformed {
            offset: cur.offset(),
            msg: "invalid limits flag",
        }),
    }
}

fn read_func_type(cur: &mut Cursor) -> Result<FuncType> {
    if cur.read_u8()? != 0x60 {
        return Err(DecodeError::Malformed {
            offset: cur.offset(),
            msg: "expected function type (0x60)",
        });
    }
    let params = read_vec(cur, read_val_type)?;
    let results = read_vec(cur, read_val_type)?;
    Ok(FuncType { params, results })
}

fn read_table_type(cur: &mut Cursor) -> Result<TableType> {
    let elem = match cur.read_u8()? {
        0x70 => RefType::FuncRef,
        _ => {
            return Err(DecodeError::Malformed {
                offset: cur.offset(),
                msg: "invalid element type (expected funcref)",
            })
        }
    };
    let limits = read_limits(cur)?;
    Ok(TableType { elem, limits })
}

fn read_memory_type(cur: &mut Cursor) -> Result<MemoryType> {
    Ok(MemoryType {
        limits: read_limits(cur)?,
    })
}

fn read_global_type(cur: &mut Cursor) -> Result<GlobalType> {
    let content = read_val_type(cur)?;
    let mutable = match cur.read_u8()? {
        0x00 => false,
        0x01 => true,
        _ => {
            return Err(DecodeError::Malformed {
                offset: cur.offset(),
                msg: "invalid global mutability flag",
            })
        }
    };
    Ok(GlobalType { content, mutable })
}

/// Read a constant initializer: exactly one const/global.get instruction
/// followed by `end`.
fn read_const_expr(cur: &mut Cursor) -> Result<ConstExpr> {
    let expr = match cur.read_u8()? {
        0x41 => ConstExpr::I32(leb128::read_i32(cur)?),
        0x42 => ConstExpr::I64(leb128::read_i64(cur)?),
        0x43 => ConstExpr::F32(cur.read_f32_bits()?),
        0x44 => ConstExpr::F64(cur.read_f64_bits()?),
        0x23 => ConstExpr::GlobalGet(leb128::read_u32(cur)?),
        _ => {
            return Err(DecodeError::Malformed {
                offset: cur.offset(),
                msg: "unsupported opcode in constant expression",
            })
        }
    };
    if cur.read_u8()? != 0x0B {
        return Err(DecodeError::Malformed {
            offset: cur.offset(),
            msg: "constant expression missing end",
        });
    }
    Ok(expr)
}

fn read_import_section(cur: &mut Cursor, module: &mut Module) -> Result<()> {
    module.imports = read_vec(cur, |c| {
        let module_name = c.read_name()?;
        let field = c.read_name()?;
        let desc = match c.read_u8()? {
            0x00 => ImportDesc::Func(leb128::read_u32(c)?),
            0x01 => ImportDesc::Table(read_table_type(c)?),
            0x02 => ImportDesc::Memory(read_memory_type(c)?),
            0x03 => ImportDesc::Global(read_global_type(c)?),
            _ => {
                return Err(DecodeError::Malformed {
                    offset: c.offset(),
                    msg: "invalid import descriptor tag",
                })
            }
        };
        Ok(Import {
            module: module_name,
            field,
            desc,
        })
    })?;

    for imp in &module.imports {
        match imp.desc {
            ImportDesc::Func(_) => module.imported_funcs += 1,
            ImportDesc::Table(_) => module.imported_tables += 1,
            ImportDesc::Memory(_) => module.imported_memories += 1,
            ImportDesc::Global(_) => module.imported_globals += 1,
        }
    }
    Ok(())
}

fn read_export_section(cur: &mut Cursor) -> Result<Vec<Export>> {
    read_vec(cur, |c| {
        let name = c.read_name()?;
        let desc = match c.read_u8()? {
            0x00 => ExportDesc::Func(leb128::read_u32(c)?),
            0x01 => ExportDesc::Table(leb128::read_u32(c)?),
            0x02 => ExportDesc::Memory(leb128::read_u32(c)?),
            0x03 => ExportDesc::Global(leb128::read_u32(c)?),
            _ => {
                return Err(DecodeError::Malformed {
                    offset: c.offset(),
                    msg: "invalid export descriptor tag",
                })
            }
        };
        Ok(Export { name, desc })
    })
}

fn read_element_section(cur: &mut Cursor) -> Result<Vec<ElementSegment>> {
    read_vec(cur, |c| {
        let table = leb128::read_u32(c)?;
        let offset = read_const_expr(c)?;
        let init = read_vec(c, leb128::read_u32)?;
        Ok(ElementSegment {
            table,
            offset,
            init,
        })
    })
}

fn read_data_section(cur: &mut Cursor) -> Result<Vec<DataSegment>> {
    read_vec(cur, |c| {
        let memory = leb128::read_u32(c)?;
        let offset = read_const_expr(c)?;
        let init = c.read_byte_vec()?;
        Ok(DataSegment {
            memory,
            offset,
            init,
        })
    })
}

fn read_code_section(cur: &mut Cursor) -> Result<Vec<CodeBody>> {
    let count = leb128::read_u32(cur)? as usize;
    let mut bodies = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let size = leb128::read_u32(cur)? as usize;
        let body_start = cur.offset();
        let bytes = cur.read_bytes(size)?;
        let mut body = Cursor::new(bytes);

        let groups = leb128::read_u32(&mut body)? as usize;
        let mut locals = Vec::with_capacity(groups.min(256));
        let mut total: u64 = 0;
        for _ in 0..groups {
            let count = leb128::read_u32(&mut body)?;
            let ty = read_val_type(&mut body)?;
            total += count as u64;
            if total > MAX_LOCALS {
                return Err(DecodeError::Malformed {
                    offset: body_start + body.offset(),
                    msg: "too many locals",
                });
            }
            locals.push(LocalDecl { count, ty });
        }

        let code = bytes[body.offset()..].to_vec();
        match code.last() {
            Some(0x0B) => {}
            _ => {
                return Err(DecodeError::Malformed {
                    offset: body_start + size,
                    msg: "function body missing terminating end",
                })
            }
        }
        bodies.push(CodeBody { locals, code });
    }
    Ok(bodies)
}

/// Decode a complete module image. Fails with [`DecodeError::BadHeader`]
/// before any section parsing if the magic/version check fails.
pub fn decode_module(bytes: &[u8]) -> Result<Module> {
    let mut cur = Cursor::new(bytes);

    let magic = cur
        .read_u32_le()
        .map_err(|_| DecodeError::BadHeader { msg: "truncated header" })?;
    if magic != MAGIC {
        return Err(DecodeError::BadHeader { msg: "bad magic" });
    }
    let version = cur
        .read_u32_le()
        .map_err(|_| DecodeError::BadHeader { msg: "truncated header" })?;
    if version != VERSION {
        return Err(DecodeError::BadHeader {
            msg: "unsupported version",
        });
    }

    let mut module = Module::default();
    let mut last_id: u8 = 0;
    let mut seen = [false; 12];

    while !cur.is_eof() {
        let header_offset = cur.offset();
        let id_byte = cur.read_u8()?;
        let id = SectionId::from_byte(id_byte).ok_or(DecodeError::Malformed {
            offset: header_offset,
            msg: "unknown section id",
        })?;
        let payload_len = leb128::read_u32(&mut cur)? as usize;
        let payload = cur.read_bytes(payload_len)?;
        let mut pcur = Cursor::new(payload);

        if id == SectionId::Custom {
            // Name must decode; the rest of the payload is ignored.
            let _ = pcur.read_name()?;
            continue;
        }

        if id_byte < last_id {
            return Err(DecodeError::SectionOutOfOrder {
                id: id_byte,
                offset: header_offset,
            });
        }
        if seen[id_byte as usize] {
            return Err(DecodeError::DuplicateSection {
                id: id_byte,
                offset: header_offset,
            });
        }
        seen[id_byte as usize] = true;
        last_id = id_byte;

        match id {
            SectionId::Type => module.types = read_vec(&mut pcur, read_func_type)?,
            SectionId::Import => read_import_section(&mut pcur, &mut module)?,
            SectionId::Function => module.func_types = read_vec(&mut pcur, leb128::read_u32)?,
            SectionId::Table => module.tables = read_vec(&mut pcur, read_table_type)?,
            SectionId::Memory => module.memories = read_vec(&mut pcur, read_memory_type)?,
            SectionId::Global => {
                module.globals = read_vec(&mut pcur, |c| {
                    let ty = read_global_type(c)?;
                    let init = read_const_expr(c)?;
                    Ok(Global { ty, init })
                })?
            }
            SectionId::Export => module.exports = read_export_section(&mut pcur)?,
            SectionId::Start => module.start = Some(leb128::read_u32(&mut pcur)?),
            SectionId::Element => module.elements = read_element_section(&mut pcur)?,
            SectionId::Code => module.code = read_code_section(&mut pcur)?,
            SectionId::Data => module.data = read_data_section(&mut pcur)?,
            SectionId::Custom => unreachable!(),
        }

        if pcur.remaining() != 0 {
            return Err(DecodeError::Malformed {
                offset: header_offset,
                msg: "section payload not fully consumed",
            });
        }
    }

    if module.func_types.len() != module.code.len() {
        return Err(DecodeError::Malformed {
            offset: bytes.len(),
            msg: "function and code section counts disagree",
        });
    }

    debug!(
        "decoded module: {} types, {} imports, {} functions, {} exports",
        module.types.len(),
        module.imports.len(),
        module.func_types.len(),
        module.exports.len()
    );
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_module() {
        let bytes = [0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
        let m = decode_module(&bytes).unwrap();
        assert!(m.types.is_empty());
        assert!(m.code.is_empty());
    }

    #[test]
    fn bad_magic_is_header_error() {
        let bytes = [0x00, 0x61, 0x73, 0x6E, 0x01, 0x00, 0x00, 0x00];
        assert!(matches!(
            decode_module(&bytes),
            Err(DecodeError::BadHeader { .. })
        ));
        assert!(matches!(
            decode_module(&[0x00, 0x61]),
            Err(DecodeError::BadHeader { .. })
        ));
    }

    #[test]
    fn bad_version_is_header_error() {
        let bytes = [0x00, 0x61, 0x73, 0x6D, 0x02, 0x00, 0x00, 0x00];
        assert!(matches!(
            decode_module(&bytes),
            Err(DecodeError::BadHeader { .. })
        ));
    }

    #[test]
    fn duplicate_section_rejected() {
        // header + two empty type sections
        let bytes = [
            0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00, //
            0x01, 0x01, 0x00, // type section, vec len 0
            0x01, 0x01, 0x00,
        ];
        assert!(matches!(
            decode_module(&bytes),
            Err(DecodeError::DuplicateSection { id: 1, .. })
        ));
    }

    #[test]
    fn out_of_order_section_rejected() {
        // memory section (5) then table section (4)
        let bytes = [
            0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00, //
            0x05, 0x01, 0x00, //
            0x04, 0x01, 0x00,
        ];
        assert!(matches!(
            decode_module(&bytes),
            Err(DecodeError::SectionOutOfOrder { id: 4, .. })
        ));
    }

    #[test]
    fn underconsumed_payload_rejected() {
        // type section claims 2 bytes of payload but the vec is empty
        let bytes = [
            0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00, //
            0x01, 0x02, 0x00, 0x00,
        ];
        assert!(matches!(
            decode_module(&bytes),
            Err(DecodeError::Malformed { .. })
        ));
    }
}
