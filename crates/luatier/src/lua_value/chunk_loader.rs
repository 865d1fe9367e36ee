// Lua 5.1 binary chunks (luac output)
// Reads chunks of either endianness with 4- or 8-byte size_t; dumps
// little-endian chunks with the host's size_t.

use std::io::{Cursor, Read};
use std::sync::Arc;

use super::{Constant, LocVar, LuaString, Prototype};
use crate::lua_vm::lua_limits::LUAI_MAXCCALLS;
use crate::lua_vm::{LuaError, LuaResult};

const LUA_SIGNATURE: &[u8] = b"\x1bLua";
const LUAC_VERSION: u8 = 0x51;
const LUAC_FORMAT: u8 = 0;
const HEADER_SIZE: usize = 12;

const TAG_NIL: u8 = 0;
const TAG_BOOLEAN: u8 = 1;
const TAG_NUMBER: u8 = 3;
const TAG_STRING: u8 = 4;

fn malformed(msg: impl Into<String>) -> LuaError {
    LuaError::MalformedBytecode(msg.into())
}

struct ChunkReader<'a> {
    cursor: Cursor<&'a [u8]>,
    little_endian: bool,
    size_t: usize,
    depth: usize,
}

impl<'a> ChunkReader<'a> {
    fn bytes<const N: usize>(&mut self) -> LuaResult<[u8; N]> {
        let mut buf = [0u8; N];
        self.cursor
            .read_exact(&mut buf)
            .map_err(|_| malformed("truncated precompiled chunk"))?;
        Ok(buf)
    }

    fn byte(&mut self) -> LuaResult<u8> {
        Ok(self.bytes::<1>()?[0])
    }

    fn u32(&mut self) -> LuaResult<u32> {
        let b = self.bytes::<4>()?;
        Ok(if self.little_endian {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        })
    }

    fn int(&mut self) -> LuaResult<i32> {
        Ok(self.u32()? as i32)
    }

    /// Element count; negative or absurd counts are rejected before
    /// anything is allocated.
    fn count(&mut self) -> LuaResult<usize> {
        let n = self.int()?;
        let remaining = self.cursor.get_ref().len() - self.cursor.position() as usize;
        if n < 0 || n as usize > remaining {
            return Err(malformed(format!("bad count {} in precompiled chunk", n)));
        }
        Ok(n as usize)
    }

    fn size(&mut self) -> LuaResult<usize> {
        let n = if self.size_t == 8 {
            let b = self.bytes::<8>()?;
            if self.little_endian {
                u64::from_le_bytes(b)
            } else {
                u64::from_be_bytes(b)
            }
        } else {
            self.u32()? as u64
        };
        usize::try_from(n).map_err(|_| malformed("string size overflow"))
    }

    fn number(&mut self) -> LuaResult<f64> {
        let b = self.bytes::<8>()?;
        Ok(if self.little_endian {
            f64::from_le_bytes(b)
        } else {
            f64::from_be_bytes(b)
        })
    }

    fn string(&mut self) -> LuaResult<Option<LuaString>> {
        let len = self.size()?;
        if len == 0 {
            return Ok(None);
        }
        let start = self.cursor.position() as usize;
        let data = *self.cursor.get_ref();
        let end = start
            .checked_add(len)
            .filter(|&e| e <= data.len())
            .ok_or_else(|| malformed("truncated precompiled chunk"))?;
        self.cursor.set_position(end as u64);
        // stored with its trailing NUL
        Ok(Some(LuaString::from_bytes_lossy(&data[start..end - 1])))
    }

    fn header(&mut self) -> LuaResult<()> {
        let h = self.bytes::<HEADER_SIZE>()?;
        if &h[..4] != LUA_SIGNATURE {
            return Err(malformed("bad header in precompiled chunk: not a binary chunk"));
        }
        if h[4] != LUAC_VERSION {
            return Err(malformed(format!(
                "bad header in precompiled chunk: version {:#x}",
                h[4]
            )));
        }
        if h[5] != LUAC_FORMAT {
            return Err(malformed("bad header in precompiled chunk: format"));
        }
        self.little_endian = match h[6] {
            0 => false,
            1 => true,
            _ => return Err(malformed("bad header in precompiled chunk: endianness")),
        };
        let (int_size, size_t, instr_size, number_size, integral) = (h[7], h[8], h[9], h[10], h[11]);
        if int_size != 4 || instr_size != 4 {
            return Err(malformed("bad header in precompiled chunk: int size"));
        }
        if size_t != 4 && size_t != 8 {
            return Err(malformed("bad header in precompiled chunk: size_t"));
        }
        if number_size != 8 || integral != 0 {
            return Err(malformed("bad header in precompiled chunk: lua_Number"));
        }
        self.size_t = size_t as usize;
        Ok(())
    }

    fn function(&mut self, parent_source: &LuaString) -> LuaResult<Arc<Prototype>> {
        self.depth += 1;
        if self.depth > LUAI_MAXCCALLS {
            return Err(malformed("precompiled chunk nests too deeply"));
        }
        let source = self.string()?.unwrap_or_else(|| parent_source.clone());
        let mut proto = Prototype::new(source);
        proto.line_defined = self.int()? as u32;
        proto.last_line_defined = self.int()? as u32;
        proto.num_upvalues = self.byte()?;
        proto.num_params = self.byte()?;
        proto.vararg = self.byte()?;
        proto.max_stack_size = self.byte()?;

        let n = self.count()?;
        proto.code = (0..n).map(|_| self.u32()).collect::<LuaResult<_>>()?;

        let n = self.count()?;
        proto.constants.reserve(n);
        for _ in 0..n {
            let k = match self.byte()? {
                TAG_NIL => Constant::Nil,
                TAG_BOOLEAN => Constant::Boolean(self.byte()? != 0),
                TAG_NUMBER => Constant::Number(self.number()?),
                TAG_STRING => Constant::String(self.string()?.unwrap_or_default()),
                t => return Err(malformed(format!("bad constant type {}", t))),
            };
            proto.constants.push(k);
        }

        let n = self.count()?;
        for _ in 0..n {
            let child = self.function(&proto.source)?;
            proto.protos.push(child);
        }

        let n = self.count()?;
        proto.line_info = (0..n)
            .map(|_| self.int().map(|l| l as u32))
            .collect::<LuaResult<_>>()?;
        let n = self.count()?;
        for _ in 0..n {
            let name = self.string()?.unwrap_or_default();
            let start_pc = self.int()? as u32;
            let end_pc = self.int()? as u32;
            proto.loc_vars.push(LocVar {
                name,
                start_pc,
                end_pc,
            });
        }
        let n = self.count()?;
        for _ in 0..n {
            let name = self.string()?.unwrap_or_default();
            proto.upvalue_names.push(name);
        }

        self.depth -= 1;
        Ok(Arc::new(proto))
    }
}

/// Parse a Lua 5.1 binary chunk into its main prototype.
pub fn load_binary(bytes: &[u8]) -> LuaResult<Arc<Prototype>> {
    let mut reader = ChunkReader {
        cursor: Cursor::new(bytes),
        little_endian: true,
        size_t: 8,
        depth: 0,
    };
    reader.header()?;
    let main = reader.function(&LuaString::from_static("=?"))?;
    if (reader.cursor.position() as usize) != bytes.len() {
        return Err(malformed("trailing bytes after precompiled chunk"));
    }
    Ok(main)
}

/// Whether `bytes` starts with the binary chunk signature.
pub fn is_binary_chunk(bytes: &[u8]) -> bool {
    bytes.starts_with(LUA_SIGNATURE)
}

/// Serialize a prototype tree as a Lua 5.1 binary chunk. `strip` drops the
/// source names and all debug information.
pub fn dump_binary(proto: &Prototype, strip: bool) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(LUA_SIGNATURE);
    buf.push(LUAC_VERSION);
    buf.push(LUAC_FORMAT);
    buf.push(1); // little endian
    buf.push(4); // int
    buf.push(size_of::<usize>() as u8);
    buf.push(4); // instruction
    buf.push(8); // lua_Number
    buf.push(0); // floating point
    write_function(&mut buf, proto, None, strip);
    buf
}

fn write_int(buf: &mut Vec<u8>, n: i32) {
    buf.extend_from_slice(&n.to_le_bytes());
}

fn write_size(buf: &mut Vec<u8>, n: usize) {
    buf.extend_from_slice(&n.to_le_bytes());
}

fn write_string(buf: &mut Vec<u8>, s: Option<&LuaString>) {
    match s {
        Some(s) => {
            write_size(buf, s.len() + 1);
            buf.extend_from_slice(s.as_bytes());
            buf.push(0);
        }
        None => write_size(buf, 0),
    }
}

fn write_function(buf: &mut Vec<u8>, proto: &Prototype, parent: Option<&LuaString>, strip: bool) {
    let source = if strip || parent == Some(&proto.source) {
        None
    } else {
        Some(&proto.source)
    };
    write_string(buf, source);
    write_int(buf, proto.line_defined as i32);
    write_int(buf, proto.last_line_defined as i32);
    buf.push(proto.num_upvalues);
    buf.push(proto.num_params);
    buf.push(proto.vararg);
    buf.push(proto.max_stack_size);

    write_int(buf, proto.code.len() as i32);
    for &word in &proto.code {
        buf.extend_from_slice(&word.to_le_bytes());
    }

    write_int(buf, proto.constants.len() as i32);
    for k in &proto.constants {
        match k {
            Constant::Nil => buf.push(TAG_NIL),
            Constant::Boolean(b) => {
                buf.push(TAG_BOOLEAN);
                buf.push(*b as u8);
            }
            Constant::Number(n) => {
                buf.push(TAG_NUMBER);
                buf.extend_from_slice(&n.to_le_bytes());
            }
            Constant::String(s) => {
                buf.push(TAG_STRING);
                write_string(buf, Some(s));
            }
        }
    }

    write_int(buf, proto.protos.len() as i32);
    for child in &proto.protos {
        write_function(buf, child, Some(&proto.source), strip);
    }

    if strip {
        write_int(buf, 0);
        write_int(buf, 0);
        write_int(buf, 0);
        return;
    }
    write_int(buf, proto.line_info.len() as i32);
    for &line in &proto.line_info {
        write_int(buf, line as i32);
    }
    write_int(buf, proto.loc_vars.len() as i32);
    for var in &proto.loc_vars {
        write_string(buf, Some(&var.name));
        write_int(buf, var.start_pc as i32);
        write_int(buf, var.end_pc as i32);
    }
    write_int(buf, proto.upvalue_names.len() as i32);
    for name in &proto.upvalue_names {
        write_string(buf, Some(name));
    }
}
