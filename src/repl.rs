use crate::error::*;
use crate::machine::Machine;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

const HISTORY_FILE: &str = ".quarth_history";

fn history_path() -> String {
    match std::env::var("HOME") {
        Ok(home) => format!("{}/{}", home, HISTORY_FILE),
        Err(_) => HISTORY_FILE.to_string(),
    }
}

/// Interactive terminal loop.  Each line is handed to the text
/// interpreter; `ok ` acknowledges a fully consumed line while in
/// interpretation state, uncaught throws land in the exception
/// handler and the session continues.
pub fn run(xs: &mut Machine) -> Qresult {
    let mut rl = DefaultEditor::new().map_err(|_| Qerr::IoError)?;
    let history = history_path();
    let _ = rl.load_history(&history);
    loop {
        match rl.readline("") {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                match xs.interpret(&line) {
                    Ok(()) => {
                        if !xs.is_compiling() {
                            xs.print("ok \n");
                            xs.flush();
                        }
                    }
                    Err(Qerr::Bye) => break,
                    Err(e) => {
                        xs.exception(e);
                    }
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("error: {:?}", err);
                break;
            }
        }
    }
    if let Err(e) = rl.save_history(&history) {
        eprintln!("history save failed: {}", e);
    }
    OK
}
