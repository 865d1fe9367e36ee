use luatier::lua_value::chunk_loader::load_binary;
use luatier::lua_vm::{Instruction, OpCode, OpMode, chunk_id};
use luatier::{Constant, Prototype};
use std::env;
use std::fs;

fn main() {
    let args: Vec<String> = env::args().collect();

    let bytes = if args.len() > 1 {
        let filename = &args[1];
        match fs::read(filename) {
            Ok(content) => {
                println!("=== File: {} ===\n", filename);
                content
            }
            Err(e) => {
                eprintln!("Error reading file '{}': {}", filename, e);
                std::process::exit(1);
            }
        }
    } else {
        println!("Usage: bytecode_dump <luac.out>");
        std::process::exit(0);
    };

    match load_binary(&bytes) {
        Ok(proto) => dump_proto(&proto, "main", 0),
        Err(e) => {
            eprintln!("Load error: {}", e);
            std::process::exit(1);
        }
    }
}

fn rk(x: u32) -> String {
    if Instruction::is_k(x) {
        format!("K{}", Instruction::index_k(x))
    } else {
        format!("R{}", x)
    }
}

fn constant(c: &Constant) -> String {
    match c {
        Constant::Nil => "nil".to_string(),
        Constant::Boolean(b) => b.to_string(),
        Constant::Number(n) => luatier::lua_value::format_number(*n),
        Constant::String(s) => format!("{:?}", s.as_str()),
    }
}

fn describe(proto: &Prototype, pc: usize, instr: Instruction, op: OpCode) -> String {
    let (a, b, c) = (instr.a(), instr.b(), instr.c());
    let name = op.name();
    match op {
        OpCode::LoadK | OpCode::GetGlobal | OpCode::SetGlobal => {
            let k = proto
                .constants
                .get(instr.bx() as usize)
                .map(constant)
                .unwrap_or_default();
            format!("{:<9} {} {}\t; {}", name, a, instr.bx(), k)
        }
        OpCode::Closure => format!("{:<9} {} {}\t; function <PROTO[{}]>", name, a, instr.bx(), instr.bx()),
        OpCode::Jmp | OpCode::ForLoop | OpCode::ForPrep => {
            let target = pc as i64 + 1 + instr.sbx() as i64;
            format!("{:<9} {} {}\t; to {}", name, a, instr.sbx(), target + 1)
        }
        OpCode::GetTable | OpCode::Self_ => format!("{:<9} {} {} {}", name, a, b, rk(c)),
        OpCode::SetTable
        | OpCode::Add
        | OpCode::Sub
        | OpCode::Mul
        | OpCode::Div
        | OpCode::Mod
        | OpCode::Pow
        | OpCode::Eq
        | OpCode::Lt
        | OpCode::Le => format!("{:<9} {} {} {}", name, a, rk(b), rk(c)),
        _ => match op.get_mode() {
            OpMode::IABC => format!("{:<9} {} {} {}", name, a, b, c),
            OpMode::IABx => format!("{:<9} {} {}", name, a, instr.bx()),
            OpMode::IAsBx => format!("{:<9} {} {}", name, a, instr.sbx()),
        },
    }
}

fn dump_proto(proto: &Prototype, name: &str, depth: usize) {
    let indent = "  ".repeat(depth);

    println!(
        "{}=== {} <{}:{},{}> ({}) ===",
        indent,
        name,
        chunk_id(proto.source.as_str()),
        proto.line_defined,
        proto.last_line_defined,
        proto.id()
    );
    println!(
        "{}params: {}, vararg: {}, max_stack: {}, upvalues: {}",
        indent, proto.num_params, proto.vararg, proto.max_stack_size, proto.num_upvalues
    );
    println!();

    // operand words of SETLIST and CLOSURE are printed raw
    let mut data_words = 0usize;
    for (pc, &word) in proto.code.iter().enumerate() {
        let line = proto
            .line_info
            .get(pc)
            .map(|l| format!("[{}]", l))
            .unwrap_or_else(|| "[-]".to_string());
        let instr = Instruction::from_u32(word);
        let detail = if data_words > 0 {
            data_words -= 1;
            format!("{:<9} {}", "(data)", word)
        } else {
            match instr.opcode() {
                Some(op) => {
                    if op == OpCode::SetList && instr.c() == 0 {
                        data_words = 1;
                    } else if op == OpCode::Closure {
                        data_words = proto
                            .protos
                            .get(instr.bx() as usize)
                            .map_or(0, |p| p.num_upvalues as usize);
                    }
                    describe(proto, pc, instr, op)
                }
                None => format!("{:<9} {}", "(invalid)", word),
            }
        };
        println!("{}{:4} {:<6} {}", indent, pc + 1, line, detail);
    }

    if !proto.constants.is_empty() {
        println!("\n{}constants ({}):", indent, proto.constants.len());
        for (i, k) in proto.constants.iter().enumerate() {
            println!("{}  {} = {}", indent, i, constant(k));
        }
    }

    if !proto.loc_vars.is_empty() {
        println!("\n{}locals ({}):", indent, proto.loc_vars.len());
        for (i, var) in proto.loc_vars.iter().enumerate() {
            println!(
                "{}  {} = {} [{}, {})",
                indent,
                i,
                var.name.as_str(),
                var.start_pc + 1,
                var.end_pc + 1
            );
        }
    }

    if !proto.upvalue_names.is_empty() {
        println!("\n{}upvalues ({}):", indent, proto.upvalue_names.len());
        for (i, name) in proto.upvalue_names.iter().enumerate() {
            println!("{}  {} = {}", indent, i, name.as_str());
        }
    }

    if !proto.protos.is_empty() {
        println!();
        for (i, child) in proto.protos.iter().enumerate() {
            dump_proto(child, &format!("function <PROTO[{}]>", i), depth + 1);
        }
    }
}
