use crate::cell::*;
use crate::error::*;
use crate::machine::Machine;
use crate::word::{Code, Xt};

use std::fmt::Write;

/// Render an execution token back into source-shaped text.
pub fn see(xs: &Machine, xt: Xt) -> String {
    let mut out = String::new();
    let word = match xs.word(xt) {
        Ok(word) => word,
        Err(_) => return out,
    };
    match word.code {
        Code::Enter => see_colon(xs, xt, &mut out),
        Code::DoDoes => see_does(xs, xt, &mut out),
        Code::DataField => see_created(xs, xt, &mut out),
        _ => {
            let _ = writeln!(out, ": {} ( builtin ) ;", word.name);
        }
    }
    out
}

fn see_colon(xs: &Machine, xt: Xt, out: &mut String) {
    let word = match xs.word(xt) {
        Ok(word) => word,
        Err(_) => return,
    };
    if word.name.is_empty() {
        let _ = write!(out, ":NONAME ");
    } else {
        let _ = write!(out, ": {} ", word.name);
    }
    let mut p = word.addr;
    let end = word.addr + word.ndata;
    while p < end {
        let token = match xs.fetch_cell(p).and_then(|c| c.xt()) {
            Ok(token) => token,
            Err(_) => break,
        };
        let inner = match xs.word(token) {
            Ok(inner) => inner,
            Err(_) => break,
        };
        match inner.code {
            Code::Exit => break,
            Code::Lit => {
                let val = xs.fetch_cell(p + CELL).unwrap_or_default();
                let _ = write!(out, "[ {} ] LITERAL ", val.int());
                p += 2 * CELL;
            }
            Code::Flit => {
                let val = xs.fetch_cell(p + CELL).unwrap_or_default();
                let _ = write!(out, "{:?} ", val.float());
                p += 2 * CELL;
            }
            Code::Slit => {
                let len = xs.fetch_cell(p + CELL).unwrap_or_default().addr();
                let text = xs
                    .bytes(p + 2 * CELL, len)
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                let _ = write!(out, "S\" {}\" ", text);
                p += 2 * CELL + cell_align(len);
            }
            Code::Branch | Code::BranchZ | Code::Call => {
                // the operand is a byte displacement from its own slot
                let disp = xs.fetch_cell(p + CELL).unwrap_or_default().int();
                let _ = write!(out, "{} [ {} CELLS , ] ", inner.name, disp / CELL as Qint);
                p += 2 * CELL;
            }
            _ => {
                let _ = write!(out, "{} ", inner.name);
                p += CELL;
            }
        }
    }
    let _ = write!(out, ";");
    if word.is_immediate() {
        let _ = write!(out, " IMMEDIATE");
    }
    if word.is_compile_only() {
        let _ = write!(out, " compile-only");
    }
    let _ = writeln!(out);
}

fn see_does(xs: &Machine, xt: Xt, out: &mut String) {
    let word = match xs.word(xt) {
        Ok(word) => word,
        Err(_) => return,
    };
    for i in 1..word.ndata / CELL {
        let cell = xs.fetch_cell(word.addr + i * CELL).unwrap_or_default();
        let _ = write!(out, "${:016x} ", cell.uint());
    }
    // the stored continuation points into the defining word's body
    let cont = xs.fetch_cell(word.addr).unwrap_or_default().addr();
    let definer = xs
        .dict
        .iter()
        .rposition(|w| w.code == Code::Enter && w.addr <= cont && cont < w.addr + w.ndata)
        .and_then(|i| xs.dict.get(i))
        .map(|w| w.name.as_str())
        .unwrap_or("?");
    let _ = writeln!(out, "{} {}", definer, word.name);
}

fn see_created(xs: &Machine, xt: Xt, out: &mut String) {
    let word = match xs.word(xt) {
        Ok(word) => word,
        Err(_) => return,
    };
    let size = word.ndata.saturating_sub(CELL);
    let _ = writeln!(out, "CREATE {} ( size {} )", word.name, size);
    if let Ok(dump) = mem_dump(xs, word.addr + CELL, size) {
        out.push_str(&dump);
    }
}

/// Classic hex-and-ascii dump, sixteen bytes per row.
pub fn mem_dump(xs: &Machine, addr: usize, len: usize) -> Qresult1<String> {
    let bytes = xs.bytes(addr, len)?.to_vec();
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let _ = write!(out, "{:08x} ", addr + row * 16);
        for (i, b) in chunk.iter().enumerate() {
            let _ = write!(out, " {:02x}", b);
            if (i + 1) % 4 == 0 {
                out.push(' ');
            }
        }
        for i in chunk.len()..16 {
            out.push_str("   ");
            if (i + 1) % 4 == 0 {
                out.push(' ');
            }
        }
        out.push(' ');
        for b in chunk {
            out.push(if b.is_ascii_graphic() || *b == b' ' { *b as char } else { '.' });
        }
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Options;

    fn boot() -> Machine {
        Machine::new(Options::default()).unwrap()
    }

    #[test]
    fn test_see_colon() {
        let mut xs = boot();
        xs.interpret(": SQR DUP * ;").unwrap();
        let xt = xs.find_name(b"SQR").unwrap();
        assert_eq!(": SQR DUP * ;\n", see(&xs, xt));
    }

    #[test]
    fn test_see_literal_and_string() {
        let mut xs = boot();
        xs.interpret(": GREET S\" hi\" TYPE 42 . ;").unwrap();
        let xt = xs.find_name(b"GREET").unwrap();
        let text = see(&xs, xt);
        assert!(text.contains("S\" hi\" "), "{}", text);
        assert!(text.contains("[ 42 ] LITERAL "), "{}", text);
    }

    #[test]
    fn test_see_branches_reparse() {
        let mut xs = boot();
        xs.interpret(": T IF 1 ELSE 2 THEN ;").unwrap();
        let xt = xs.find_name(b"T").unwrap();
        let text = see(&xs, xt);
        assert!(text.contains("_branchz [ "), "{}", text);
        assert!(text.contains(" CELLS , ] "), "{}", text);
        assert!(text.ends_with(";\n"), "{}", text);
    }

    #[test]
    fn test_see_immediate_flag() {
        let mut xs = boot();
        xs.interpret(": M 1 ; IMMEDIATE").unwrap();
        let xt = xs.find_name(b"M").unwrap();
        assert_eq!(": M [ 1 ] LITERAL ; IMMEDIATE\n", see(&xs, xt));
    }

    #[test]
    fn test_see_created_and_does() {
        let mut xs = boot();
        xs.interpret(": CONSTANT CREATE , DOES> @ ;").unwrap();
        xs.interpret("377 CONSTANT MONACO").unwrap();
        let xt = xs.find_name(b"MONACO").unwrap();
        let text = see(&xs, xt);
        assert!(text.contains("CONSTANT MONACO"), "{}", text);

        xs.interpret("CREATE BUF 3 ALLOT").unwrap();
        let xt = xs.find_name(b"BUF").unwrap();
        let text = see(&xs, xt);
        assert!(text.starts_with("CREATE BUF ( size 3 )"), "{}", text);
    }

    #[test]
    fn test_see_builtin() {
        let xs = boot();
        let xt = xs.find_name(b"DUP").unwrap();
        assert_eq!(": DUP ( builtin ) ;\n", see(&xs, xt));
    }

    #[test]
    fn test_mem_dump_shape() {
        let mut xs = boot();
        xs.interpret("CREATE D 65 C, 66 C, 67 C,").unwrap();
        let xt = xs.find_name(b"D").unwrap();
        let addr = xs.word(xt).unwrap().addr + CELL;
        let dump = mem_dump(&xs, addr, 3).unwrap();
        assert!(dump.contains("41 42 43"), "{}", dump);
        assert!(dump.contains("ABC"), "{}", dump);
    }
}
