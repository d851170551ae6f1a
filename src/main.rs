use clap::Parser;
use quarth::error::Qerr;
use quarth::machine::{self, Machine, Options};
use quarth::repl;

#[derive(Parser)]
#[command(name = "quarth", version, about = "Forth-2012 style interpreter")]
struct Cli {
    /// data stack size in cells
    #[arg(short = 'd', long, default_value_t = 64)]
    data_stack: usize,

    /// return stack size in cells
    #[arg(short = 'r', long, default_value_t = 64)]
    return_stack: usize,

    /// float stack size in cells
    #[arg(short = 'f', long, default_value_t = 6)]
    float_stack: usize,

    /// data space size in KB
    #[arg(short = 'm', long, default_value_t = 128)]
    mem: usize,

    /// block file, searched for here then under $HOME
    #[arg(short = 'b', long, default_value = ".quarth.blk")]
    block_file: String,

    /// file to interpret before the script; may be repeated
    #[arg(short = 'i', long)]
    include: Vec<String>,

    /// script to interpret, "-" for standard input
    script: Option<String>,

    /// arguments visible to the script
    args: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    machine::install_signal_handlers();

    let opts = Options {
        ds_size: cli.data_stack,
        rs_size: cli.return_stack,
        fs_size: cli.float_stack,
        mem_size: cli.mem,
        block_file: Some(cli.block_file),
        argv: cli.args,
    };
    let mut xs = match Machine::new(opts) {
        Ok(xs) => xs,
        Err(e) => {
            eprintln!("cannot create interpreter: {:?}", e);
            std::process::exit(1);
        }
    };

    for file in &cli.include {
        if let Err(e) = xs.include(file) {
            let code = xs.exception(e);
            std::process::exit(if code == 0 { 0 } else { 1 });
        }
    }

    match cli.script.as_deref() {
        Some(script) if script != "-" => match xs.eval_file(script) {
            Ok(()) | Err(Qerr::Bye) => (),
            Err(e) => {
                xs.exception(e);
                std::process::exit(1);
            }
        },
        _ => {
            if xs.is_interactive() {
                let _ = repl::run(&mut xs);
            } else {
                xs.eval();
            }
        }
    }
}
