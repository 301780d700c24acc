use clap::Parser as ClapParser;
use std::{ffi::CString, process};

use nativecall::{
    Argument, CallError, CallOutcome, FaultClass, Invoker, InvokerCreateInfo, MetaField,
    NativeDirectory, NativeFault, NativeIdentifier, NativeTable, OutputKind, PACKED_ARG_BOUNDED,
    PACKED_ARG_POINTER, PACKED_ARG_STRING, ResultCoercion, ResultValue, UntypedPolicy, Word,
};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Native to call, by demo name or hex identifier
    #[arg(required_unless_present = "list")]
    native: Option<String>,

    /// Arguments: i:<int> l:<long> f:<float> s:<text> b:<bytes> out:<int|float|vec>
    /// as:<int|long|float|vec|string|object> anyway
    #[arg(allow_hyphen_values = true)]
    args: Vec<String>,

    /// List the demo natives
    #[arg(long)]
    list: bool,

    #[arg(long, help = "Report every compatibility correction as an error")]
    strict: bool,

    #[arg(long, help = "Number of isolation slices")]
    slices: Option<usize>,

    #[arg(long, help = "Bytes per isolation slice")]
    slice_size: Option<usize>,

    #[arg(long, help = "Isolate every pointer passed to natives without a signature")]
    isolate_untyped: bool,

    #[arg(short, long, help = "Log isolation decisions and corrections")]
    verbose: bool,
}

struct Demo {
    name: &'static str,
    id: u64,
    // packed signature, empty when the native has none
    signature: &'static [u32],
    about: &'static str,
}

const GREETING: &std::ffi::CStr = c"hello from the host";

const DEMOS: &[Demo] = &[
    Demo {
        name: "add",
        id: 0x4A1B_7C2D_0000_0001,
        signature: &[2, 0, 1, 0, 0],
        about: "i32 + i32",
    },
    Demo {
        name: "fill",
        id: 0x4A1B_7C2D_0000_0002,
        signature: &[2, 0b01, 0, PACKED_ARG_POINTER, 0],
        about: "increments the first n bytes of a buffer",
    },
    Demo {
        name: "clamp",
        id: 0x4A1B_7C2D_0000_0003,
        signature: &[1, 0, 1, PACKED_ARG_BOUNDED | 100],
        about: "echoes an integer of at most 100",
    },
    Demo {
        name: "strlen",
        id: 0x4A1B_7C2D_0000_0004,
        signature: &[1, 0b1, 1, PACKED_ARG_POINTER | PACKED_ARG_STRING],
        about: "length of a string",
    },
    Demo {
        name: "greeting",
        id: 0x4A1B_7C2D_0000_0005,
        signature: &[0, 0, 5],
        about: "returns a string",
    },
    Demo {
        name: "origin",
        id: 0x4A1B_7C2D_0000_0006,
        signature: &[0, 0, 4],
        about: "returns the vector (1, 2, 3)",
    },
    Demo {
        name: "counter",
        id: 0x4A1B_7C2D_0000_0007,
        signature: &[1, 0b1, 0, PACKED_ARG_POINTER | 4],
        about: "increments an integer output",
    },
    Demo {
        name: "disabled",
        id: 0x4A1B_7C2D_0000_0008,
        signature: &[u32::MAX, 0, 0],
        about: "blocked native",
    },
    Demo {
        name: "echo",
        id: 0x4A1B_7C2D_0000_0009,
        signature: &[],
        about: "no signature, returns its first argument",
    },
];

fn demo_table() -> NativeTable {
    let mut table = NativeTable::new();
    let id = |name: &str| {
        let demo = DEMOS.iter().find(|demo| demo.name == name);
        NativeIdentifier(demo.map_or(0, |demo| demo.id))
    };

    table.register(id("add"), |call| {
        call.set_result_i32(call.arg_i32(0).wrapping_add(call.arg_i32(1)));
        Ok(())
    });
    table.register(id("fill"), |call| {
        let ptr = call.arg_ptr::<u8>(0);
        if ptr.is_null() {
            return Err(NativeFault::new(FaultClass::AccessViolation, "null buffer").at(0));
        }
        for i in 0..call.arg(1) as u32 as usize {
            // SAFETY: the caller passes the buffer length
            unsafe { *ptr.add(i) = (*ptr.add(i)).wrapping_add(1) };
        }
        Ok(())
    });
    table.register(id("clamp"), |call| {
        call.set_result_i32(call.arg_i32(0));
        Ok(())
    });
    table.register(id("strlen"), |call| {
        let ptr = call.arg_ptr::<std::ffi::c_char>(0);
        let len = if ptr.is_null() {
            0
        } else {
            // SAFETY: declared as a string
            unsafe { std::ffi::CStr::from_ptr(ptr) }.to_bytes().len()
        };
        call.set_result_i32(len as i32);
        Ok(())
    });
    table.register(id("greeting"), |call| {
        call.set_result(GREETING.as_ptr() as usize as Word);
        Ok(())
    });
    table.register(id("origin"), |call| {
        call.set_result_vector3([1.0, 2.0, 3.0]);
        Ok(())
    });
    table.register(id("counter"), |call| {
        let ptr = call.arg_ptr::<i32>(0);
        if !ptr.is_null() {
            // SAFETY: at least four bytes
            unsafe { *ptr += 1 };
        }
        Ok(())
    });
    table.register(id("disabled"), |_| Ok(()));
    table.register(id("echo"), |call| {
        call.set_result(call.arg(0));
        Ok(())
    });
    table
}

fn demo_directory() -> NativeDirectory {
    let packed = DEMOS
        .iter()
        .filter(|demo| !demo.signature.is_empty())
        .map(|demo| (demo.id, demo.signature))
        .collect::<Vec<_>>();
    match NativeDirectory::from_packed(&packed) {
        Ok(directory) => directory,
        Err((id, err)) => {
            eprintln!("Error in demo signature {id}: {err}");
            process::exit(1);
        }
    }
}

fn resolve_native(name: &str) -> Option<NativeIdentifier> {
    if let Some(demo) = DEMOS.iter().find(|demo| demo.name == name) {
        return Some(NativeIdentifier(demo.id));
    }
    let digits = name.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(digits, 16).ok().map(NativeIdentifier)
}

/// A command line argument before anything borrows it.
#[derive(Debug)]
enum Token {
    Int(i32),
    Long(i64),
    Float(f32),
    Text(CString),
    Bytes(Vec<u8>),
    Request(MetaField),
}

fn parse_token(token: &str) -> Result<Token, String> {
    if token == "anyway" {
        return Ok(Token::Request(MetaField::ReturnResultAnyway));
    }
    let Some((kind, value)) = token.split_once(':') else {
        return Err(format!("expected <kind>:<value>, got '{token}'"));
    };
    let bad = |err: &dyn std::fmt::Display| format!("bad value in '{token}': {err}");
    match kind {
        "i" => value.parse().map(Token::Int).map_err(|err| bad(&err)),
        "l" => value.parse().map(Token::Long).map_err(|err| bad(&err)),
        "f" => value.parse().map(Token::Float).map_err(|err| bad(&err)),
        "s" => CString::new(value).map(Token::Text).map_err(|err| bad(&err)),
        "b" => value
            .parse::<usize>()
            .map(|len| Token::Bytes(vec![0; len]))
            .map_err(|err| bad(&err)),
        "out" => {
            let kind = match value {
                "int" => OutputKind::Integer,
                "float" => OutputKind::Float,
                "vec" => OutputKind::Vector3,
                _ => return Err(format!("unknown output kind '{value}'")),
            };
            Ok(Token::Request(MetaField::Output(kind)))
        }
        "as" => {
            let coercion = match value {
                "int" => ResultCoercion::Integer,
                "long" => ResultCoercion::Long,
                "float" => ResultCoercion::Float,
                "vec" => ResultCoercion::Vector3,
                "string" => ResultCoercion::String,
                "object" => ResultCoercion::Object,
                _ => return Err(format!("unknown result kind '{value}'")),
            };
            Ok(Token::Request(MetaField::ResultAs(coercion)))
        }
        _ => Err(format!("unknown argument kind '{kind}'")),
    }
}

fn print_value(label: &str, value: &ResultValue) {
    match value {
        ResultValue::Nil => println!("{label}: nil"),
        ResultValue::Int(value) => println!("{label}: {value}"),
        ResultValue::Long(value) => println!("{label}: {value} ({value:#x})"),
        ResultValue::Float(value) => println!("{label}: {value}"),
        ResultValue::Vector3([x, y, z]) => println!("{label}: ({x}, {y}, {z})"),
        ResultValue::String(text) => println!("{label}: \"{text}\""),
        ResultValue::Object(bytes) => println!("{label}: object of {} bytes", bytes.len()),
    }
}

fn call(invoker: &Invoker, native: NativeIdentifier, tokens: &mut [Token]) -> Result<(), CallError> {
    let mut ctx = invoker.begin(native);
    for token in tokens.iter_mut() {
        match token {
            Token::Int(value) => ctx.push(*value)?,
            Token::Long(value) => ctx.push(*value)?,
            Token::Float(value) => ctx.push(*value)?,
            Token::Text(text) => ctx.push(text.as_c_str())?,
            Token::Bytes(bytes) => ctx.push(Argument::Buffer(bytes))?,
            Token::Request(field) => ctx.push(*field)?,
        }
    }

    if ctx.invoke()? == CallOutcome::Skipped {
        println!("native {native} was not executed");
        return Ok(());
    }

    // SAFETY: the demo natives return valid strings and no objects
    let primary = unsafe { ctx.read_primary_result() };
    print_value("result", &primary);
    for index in 0..ctx.extra_result_count() {
        if let Some(value) = ctx.read_extra_result(index) {
            print_value(&format!("out[{index}]"), &value);
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if cli.list {
        for demo in DEMOS {
            println!("{:<10} 0x{:016X}  {}", demo.name, demo.id, demo.about);
        }
        return;
    }

    let Some(name) = cli.native.as_deref() else {
        eprintln!("Error: no native given");
        process::exit(2);
    };
    let Some(native) = resolve_native(name) else {
        eprintln!("Error: unknown native '{name}'");
        process::exit(2);
    };

    let mut tokens = Vec::with_capacity(cli.args.len());
    for arg in &cli.args {
        match parse_token(arg) {
            Ok(token) => tokens.push(token),
            Err(err) => {
                eprintln!("Error: {err}");
                process::exit(2);
            }
        }
    }

    let invoker = Invoker::new(
        InvokerCreateInfo {
            slice_count: cli.slices,
            slice_size: cli.slice_size,
            strict: Some(cli.strict),
            untyped_policy: cli.isolate_untyped.then_some(UntypedPolicy::Isolate),
            ..Default::default()
        },
        demo_directory(),
        demo_table(),
    );

    if let Err(err) = call(&invoker, native, &mut tokens) {
        eprintln!("Error: {err}");
        process::exit(1);
    }

    for token in &tokens {
        if let Token::Bytes(bytes) = token {
            println!("buffer: {bytes:?}");
        }
    }
}
