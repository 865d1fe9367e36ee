use luatier::lua_vm::SafeOption;
use luatier::{JitMode, LuaVM, LuaValue, Stdlib};
use std::env;
use std::fs;
use tracing_subscriber::EnvFilter;

const VERSION: &str = "luatier 0.1 (Lua 5.1 bytecode)";

fn print_usage() {
    eprintln!("usage: luatier [options] chunk [args]");
    eprintln!("Available options are:");
    eprintln!("  -j mode   compilation mode: off, auto or strict");
    eprintln!("  -s        print compilation statistics on exit");
    eprintln!("  -v        show version information");
    eprintln!("  -E        ignore environment variables");
    eprintln!("  --        stop handling options");
}

#[derive(Default)]
struct Options {
    jit: Option<JitMode>,
    chunk_file: Option<String>,
    chunk_args: Vec<String>,
    show_version: bool,
    show_stats: bool,
    ignore_env: bool,
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();
    let mut opts = Options::default();
    let mut i = 1;
    let mut stop_options = false;

    while i < args.len() {
        let arg = &args[i];

        if !stop_options && arg.starts_with('-') {
            match arg.as_str() {
                "-j" => {
                    i += 1;
                    let Some(mode) = args.get(i) else {
                        return Err("'-j' needs argument".to_string());
                    };
                    opts.jit = Some(mode.parse()?);
                }
                "-s" => opts.show_stats = true,
                "-v" => opts.show_version = true,
                "-E" => opts.ignore_env = true,
                "--" => stop_options = true,
                _ => return Err(format!("unrecognized option '{}'", arg)),
            }
        } else {
            opts.chunk_file = Some(arg.clone());
            opts.chunk_args = args[i + 1..].to_vec();
            break;
        }
        i += 1;
    }

    Ok(opts)
}

/// `arg[0]` is the chunk name, `arg[1..]` its arguments, `arg[-1]` the executable.
fn setup_arg_table(vm: &mut LuaVM, exe_path: &str, chunk_name: &str, args: &[String]) {
    let arg_table = vm.create_table(args.len(), 2);
    if let Some(t) = arg_table.as_table() {
        let mut t = t.borrow_mut();
        t.raw_seti(-1, LuaValue::from(exe_path));
        t.raw_seti(0, LuaValue::from(chunk_name));
        for (i, a) in args.iter().enumerate() {
            t.raw_seti(i as i64 + 1, LuaValue::from(a.as_str()));
        }
    }
    vm.set_global("arg", arg_table);
}

fn init_logging(ignore_env: bool) {
    let filter = if ignore_env {
        EnvFilter::new("warn")
    } else {
        EnvFilter::try_from_env("LUATIER_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_chunk(vm: &mut LuaVM, filename: &str, args: &[String]) -> Result<(), String> {
    let bytes = fs::read(filename).map_err(|e| format!("cannot open {}: {}", filename, e))?;
    let main = vm
        .load_binary(&bytes)
        .map_err(|e| format!("{}: {}", filename, e))?;
    let args = args.iter().map(|a| LuaValue::from(a.as_str())).collect();
    match vm.call(main, args) {
        Ok(_) => Ok(()),
        Err(e) => Err(match e.traceback() {
            Some(traceback) => format!("{}\n{}", e, traceback),
            None => e.to_string(),
        }),
    }
}

fn main() {
    // Deep host re-entry (pcall, metamethods, resume) recurses on the native stack.
    let stack_size = 16 * 1024 * 1024;
    let builder = std::thread::Builder::new()
        .name("luatier-main".into())
        .stack_size(stack_size);

    let code = match builder.spawn(lua_main) {
        Ok(handle) => handle.join().unwrap_or_else(|_| {
            eprintln!("luatier: internal error (thread panicked)");
            1
        }),
        Err(e) => {
            eprintln!("luatier: cannot spawn main thread: {}", e);
            1
        }
    };
    std::process::exit(code);
}

fn lua_main() -> i32 {
    let opts = match parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("luatier: {}", e);
            print_usage();
            return 1;
        }
    };

    init_logging(opts.ignore_env);

    if opts.show_version {
        println!("{}", VERSION);
        if opts.chunk_file.is_none() {
            return 0;
        }
    }

    let Some(chunk_file) = opts.chunk_file.as_deref() else {
        print_usage();
        return 1;
    };

    let env_jit = if opts.ignore_env {
        None
    } else {
        match env::var("LUATIER_JIT").ok().map(|v| v.parse::<JitMode>()) {
            Some(Ok(mode)) => Some(mode),
            Some(Err(e)) => {
                eprintln!("luatier: LUATIER_JIT: {}", e);
                return 1;
            }
            None => None,
        }
    };
    let jit = opts.jit.or(env_jit).unwrap_or_default();

    let mut vm = LuaVM::new(SafeOption::default().with_jit(jit));
    if let Err(e) = vm.open_stdlib(Stdlib::All) {
        eprintln!("luatier: {}", e);
        return 1;
    }

    let exe = env::args().next().unwrap_or_else(|| "luatier".to_string());
    setup_arg_table(&mut vm, &exe, chunk_file, &opts.chunk_args);

    let status = match run_chunk(&mut vm, chunk_file, &opts.chunk_args) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("luatier: {}", e);
            1
        }
    };

    if opts.show_stats {
        let stats = vm.jit_stats();
        eprintln!(
            "jit: mode={:?} compiled={} failed={} cache_hits={} native={}",
            jit, stats.compiled, stats.failed, stats.cache_hits, stats.native_units
        );
    }
    status
}
