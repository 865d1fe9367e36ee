// Library registration
// Host libraries are declared as modules of named entries and installed
// into a VM's globals: `_G` entries become globals, other modules become a
// global table of their entries.

use crate::lua_value::{CFunction, LuaTable, LuaValue};
use crate::lua_vm::{LuaResult, LuaVM};
use crate::stdlib;

/// Value created when the module is installed
pub type ValueInitializer = fn(&mut LuaVM) -> LuaValue;

pub enum LibraryEntry {
    Function(CFunction),
    Value(ValueInitializer),
}

pub struct LibraryModule {
    pub name: &'static str,
    pub entries: Vec<(&'static str, LibraryEntry)>,
}

impl LibraryModule {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
        }
    }

    pub fn with_function(mut self, name: &'static str, func: CFunction) -> Self {
        self.entries.push((name, LibraryEntry::Function(func)));
        self
    }

    pub fn with_value(mut self, name: &'static str, value_init: ValueInitializer) -> Self {
        self.entries.push((name, LibraryEntry::Value(value_init)));
        self
    }
}

/// Build a `LibraryModule` from `name => function` pairs.
#[macro_export]
macro_rules! lib_module {
    ($name:expr, {
        $($item_name:expr => $item:expr),* $(,)?
    }) => {{
        let mut module = $crate::lib_registry::LibraryModule::new($name);
        $(
            module.entries.push(($item_name, $crate::lib_registry::LibraryEntry::Function($item)));
        )*
        module
    }};
}

/// Ordered set of modules to install.
pub struct LibraryRegistry {
    modules: Vec<LibraryModule>,
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    pub fn register(&mut self, module: LibraryModule) {
        self.modules.push(module);
    }

    pub fn load_all(&self, vm: &mut LuaVM) -> LuaResult<()> {
        for module in &self.modules {
            self.load_module(vm, module)?;
        }
        Ok(())
    }

    pub fn load_module(&self, vm: &mut LuaVM, module: &LibraryModule) -> LuaResult<()> {
        if module.name == "_G" {
            for (name, entry) in &module.entries {
                let value = entry_value(vm, entry);
                vm.set_global(name, value);
            }
            return Ok(());
        }

        let mut table = LuaTable::with_capacity(0, module.entries.len());
        for (name, entry) in &module.entries {
            let value = entry_value(vm, entry);
            table
                .raw_set(LuaValue::from(*name), value)
                .map_err(|e| vm.error(e.to_string()))?;
        }
        vm.set_global(module.name, LuaValue::table(table));
        Ok(())
    }

    pub fn get_module(&self, name: &str) -> Option<&LibraryModule> {
        self.modules.iter().find(|m| m.name == name)
    }
}

impl Default for LibraryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn entry_value(vm: &mut LuaVM, entry: &LibraryEntry) -> LuaValue {
    match entry {
        LibraryEntry::Function(func) => LuaValue::cfunction(*func),
        LibraryEntry::Value(value_init) => value_init(vm),
    }
}

/// Registry with every library this crate ships.
pub fn create_standard_registry() -> LibraryRegistry {
    let mut registry = LibraryRegistry::new();
    registry.register(stdlib::basic::create_basic_lib());
    registry.register(stdlib::coroutine::create_coroutine_lib());
    registry
}

/// Argument `index` (1-based), or a "value expected" error.
pub fn require_arg(vm: &LuaVM, index: usize, func_name: &str) -> LuaResult<LuaValue> {
    if index > vm.arg_count() {
        return Err(vm.arg_error(index, func_name, "value expected"));
    }
    Ok(vm.get_arg(index))
}

/// Argument `index` as a table.
pub fn require_table(
    vm: &LuaVM,
    index: usize,
    func_name: &str,
) -> LuaResult<crate::lua_value::LuaTableRef> {
    let arg = vm.get_arg(index);
    match arg.as_table() {
        Some(t) => Ok(t.clone()),
        None => Err(vm.arg_error(
            index,
            func_name,
            format!("table expected, got {}", type_name_of(vm, index)),
        )),
    }
}

/// Argument `index` as a number (numeric strings are converted).
pub fn require_number(vm: &LuaVM, index: usize, func_name: &str) -> LuaResult<f64> {
    vm.get_arg(index).to_number().ok_or_else(|| {
        vm.arg_error(
            index,
            func_name,
            format!("number expected, got {}", type_name_of(vm, index)),
        )
    })
}

/// Optional numeric argument with a default for nil/absent.
pub fn opt_number(vm: &LuaVM, index: usize, func_name: &str, default: f64) -> LuaResult<f64> {
    if vm.get_arg(index).is_nil() {
        Ok(default)
    } else {
        require_number(vm, index, func_name)
    }
}

fn type_name_of(vm: &LuaVM, index: usize) -> &'static str {
    if index > vm.arg_count() {
        "no value"
    } else {
        vm.get_arg(index).type_name()
    }
}
