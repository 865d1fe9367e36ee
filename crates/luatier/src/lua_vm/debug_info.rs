// Source positions and tracebacks for error messages

use std::fmt::Write;

use super::lua_limits::LUA_IDSIZE;
use super::{CallInfo, LuaError, LuaVM};
use crate::lua_value::{LuaFunction, LuaValue};

/// Printable chunk name, as `luaO_chunkid` renders it.
pub fn chunk_id(source: &str) -> String {
    if let Some(name) = source.strip_prefix('=') {
        return name.chars().take(LUA_IDSIZE - 1).collect();
    }
    if let Some(file) = source.strip_prefix('@') {
        let len = file.chars().count();
        if len <= LUA_IDSIZE - 1 {
            return file.to_string();
        }
        let tail: String = file.chars().skip(len - (LUA_IDSIZE - 4)).collect();
        return format!("...{}", tail);
    }
    let first_line = source.lines().next().unwrap_or("");
    let room = LUA_IDSIZE - 15;
    if first_line.len() < source.len() || first_line.chars().count() > room {
        let head: String = first_line.chars().take(room).collect();
        format!("[string \"{}...\"]", head)
    } else {
        format!("[string \"{}\"]", first_line)
    }
}

fn frame_position(ci: &CallInfo) -> Option<String> {
    let cl = ci.closure()?;
    let line = ci
        .current_line()
        .map_or_else(|| "?".to_string(), |l| l.to_string());
    Some(format!("{}:{}: ", chunk_id(cl.proto.source.as_str()), line))
}

impl LuaVM {
    /// `chunk:line: ` of the running Lua code: the top frame, or the frame
    /// that called the running host function.
    pub(crate) fn where_(&self) -> String {
        let mut frames = self.state.frames.iter().rev();
        let ci = match frames.next() {
            Some(ci) if ci.is_lua() => Some(ci),
            Some(_) => frames.next().filter(|ci| ci.is_lua()),
            None => None,
        };
        ci.and_then(frame_position).unwrap_or_default()
    }

    /// Position prefix for `error(msg, level)`: level 1 is the caller of the
    /// running host function.
    pub(crate) fn where_at_level(&self, level: usize) -> String {
        let n = self.state.frames.len();
        if level == 0 || level >= n {
            return String::new();
        }
        frame_position(&self.state.frames[n - 1 - level]).unwrap_or_default()
    }

    /// Runtime error with the current source position prepended.
    pub fn error(&self, msg: impl AsRef<str>) -> LuaError {
        LuaError::runtime(format!("{}{}", self.where_(), msg.as_ref()))
    }

    /// "bad argument" error for a host function.
    pub fn arg_error(&self, arg: usize, fname: &str, msg: impl AsRef<str>) -> LuaError {
        self.error(format!("bad argument #{} to '{}' ({})", arg, fname, msg.as_ref()))
    }

    pub(crate) fn type_error(&self, value: &LuaValue, action: &str) -> LuaError {
        self.error(format!("attempt to {} a {} value", action, value.type_name()))
    }

    /// `stack traceback:` listing of the running coroutine's frames.
    pub fn traceback(&self) -> String {
        let mut out = String::from("stack traceback:");
        for ci in self.state.frames.iter().rev() {
            match &ci.func {
                LuaFunction::Lua(cl) => {
                    let source = chunk_id(cl.proto.source.as_str());
                    let line = ci
                        .current_line()
                        .map_or_else(|| "?".to_string(), |l| l.to_string());
                    if cl.proto.line_defined == 0 {
                        let _ = write!(out, "\n\t{}:{}: in main chunk", source, line);
                    } else {
                        let _ = write!(
                            out,
                            "\n\t{}:{}: in function <{}:{}>",
                            source, line, source, cl.proto.line_defined
                        );
                    }
                }
                _ => out.push_str("\n\t[C]: ?"),
            }
            if ci.is_tail() {
                out.push_str("\n\t(tail call): ?");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::chunk_id;

    #[test]
    fn chunk_names() {
        assert_eq!(chunk_id("=stdin"), "stdin");
        assert_eq!(chunk_id("@test.lua"), "test.lua");
        assert_eq!(chunk_id("x = 1"), "[string \"x = 1\"]");
        assert_eq!(chunk_id("x = 1\ny = 2"), "[string \"x = 1...\"]");
    }
}
