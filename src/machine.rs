use crate::arith::*;
use crate::block::{self, BlockCache};
use crate::cell::*;
use crate::debug::*;
use crate::error::*;
use crate::input::*;
use crate::stack::{Stack, StackId};
use crate::word::*;

use std::io::{BufRead, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};

/// Set from the SIGINT handler, polled by the inner interpreter.
pub static INTERRUPTED: AtomicBool = AtomicBool::new(false);

pub fn install_signal_handlers() {
    unsafe {
        libc::signal(
            libc::SIGINT,
            handle_signal as extern "C" fn(libc::c_int) as libc::sighandler_t,
        );
    }
}

extern "C" fn handle_signal(_signum: libc::c_int) {
    INTERRUPTED.store(true, Ordering::Relaxed);
}

pub const STATE_INTERPRET: Qint = 0;
pub const STATE_COMPILE: Qint = -1;

// Reserved data space below the dictionary.  The trampoline is the
// two-cell sequence the outer interpreter primes to execute a word;
// STATE, BASE, >IN and BLK are ordinary cells so Forth code can @ and
// ! them; then the PAD transient buffer, one terminal-input buffer per
// nested file source, and the block buffer.
pub(crate) const EXEC_ADDR: usize = 0;
pub(crate) const STATE_ADDR: usize = 2 * CELL;
pub(crate) const BASE_ADDR: usize = 3 * CELL;
pub(crate) const TO_IN_ADDR: usize = 4 * CELL;
pub(crate) const BLK_ADDR: usize = 5 * CELL;
pub(crate) const PAD_ADDR: usize = 6 * CELL;
pub(crate) const PAD_SIZE: usize = 256;
pub(crate) const TIB_ADDR: usize = PAD_ADDR + PAD_SIZE;
pub(crate) const TIB_SIZE: usize = 1024;
pub(crate) const TIB_DEPTH: usize = 8;
pub(crate) const BLOCK_ADDR: usize = TIB_ADDR + TIB_DEPTH * TIB_SIZE;
pub(crate) const DATA_ORIGIN: usize = BLOCK_ADDR + block::BLOCK_SIZE;

#[cfg(debug_assertions)]
const POISON: u8 = 0xbe;

/// Execution tokens the compiler itself emits.
#[derive(Clone, Copy)]
pub(crate) struct Prims {
    pub lit: Xt,
    pub flit: Xt,
    pub slit: Xt,
    pub exit: Xt,
    pub branch: Xt,
    pub branchz: Xt,
    pub do_rt: Xt,
    pub loop_rt: Xt,
    pub unloop: Xt,
    pub type_: Xt,
    pub throw: Xt,
    pub compile_comma: Xt,
}

impl Default for Prims {
    fn default() -> Self {
        let nil = Xt(0);
        Prims {
            lit: nil,
            flit: nil,
            slit: nil,
            exit: nil,
            branch: nil,
            branchz: nil,
            do_rt: nil,
            loop_rt: nil,
            unloop: nil,
            type_: nil,
            throw: nil,
            compile_comma: nil,
        }
    }
}

pub struct Options {
    pub ds_size: usize,
    pub rs_size: usize,
    pub fs_size: usize,
    /// Data space in KB.
    pub mem_size: usize,
    pub block_file: Option<String>,
    pub argv: Vec<String>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            ds_size: 64,
            rs_size: 64,
            fs_size: 6,
            mem_size: 128,
            block_file: None,
            argv: Vec::new(),
        }
    }
}

pub struct Machine {
    pub(crate) dict: Vec<Word>,
    pub(crate) mem: Vec<u8>,
    pub(crate) here: usize,
    /// Floor of the ALLOCATE region carved from the top of data space.
    pub(crate) heap: usize,
    pub(crate) ds: Stack,
    pub(crate) rs: Stack,
    pub(crate) fs: Stack,
    pub(crate) ip: usize,
    pub(crate) input: Input,
    pub(crate) sources: Vec<Input>,
    pub(crate) block: BlockCache,
    pub(crate) argv: Vec<(usize, usize)>,
    pub(crate) precision: usize,
    pub(crate) prims: Prims,
    out: Option<Vec<u8>>,
    tty: bool,
}

impl Machine {
    pub fn new(opts: Options) -> Qresult1<Machine> {
        let mem_bytes = opts.mem_size * 1024;
        if mem_bytes < DATA_ORIGIN + 4096 {
            return Err(Qerr::Allocate);
        }
        let mut xs = Machine {
            dict: Vec::new(),
            mem: vec![0u8; mem_bytes],
            here: DATA_ORIGIN,
            heap: mem_bytes,
            ds: Stack::new(opts.ds_size, StackId::Data),
            rs: Stack::new(opts.rs_size, StackId::Return),
            fs: Stack::new(opts.fs_size, StackId::Float),
            ip: 0,
            input: Input::terminal(TIB_ADDR, TIB_SIZE),
            sources: Vec::new(),
            block: BlockCache::closed(),
            argv: Vec::new(),
            precision: 6,
            prims: Prims::default(),
            out: None,
            tty: unsafe { libc::isatty(0) == 1 },
        };
        xs.store_cell(STATE_ADDR, Cell(STATE_INTERPRET))?;
        xs.store_cell(BASE_ADDR, Cell(10))?;
        xs.store_cell(TO_IN_ADDR, Cell(0))?;
        xs.store_cell(BLK_ADDR, Cell(0))?;
        for arg in &opts.argv {
            let bytes = arg.as_bytes();
            let addr = xs.here;
            if xs.heap <= addr + bytes.len() {
                return Err(Qerr::Allocate);
            }
            xs.mem[addr..addr + bytes.len()].copy_from_slice(bytes);
            xs.argv.push((addr, bytes.len()));
            xs.here += bytes.len();
        }
        xs.here = cell_align(xs.here);
        xs.load_core()?;
        xs.resolve_prims()?;
        let repl = xs.find_any("_repl")?;
        xs.store_cell(EXEC_ADDR + CELL, Cell::from_xt(repl))?;
        if let Some(path) = &opts.block_file {
            xs.block = block::open_cache(path);
        }
        Ok(xs)
    }

    pub fn push_data(&mut self, x: Cell) -> Qresult {
        self.ds.push(x)
    }

    pub fn pop_data(&mut self) -> Qresult1<Cell> {
        self.ds.pop()
    }

    pub fn top_data(&self) -> Qresult1<Cell> {
        self.ds.top()
    }

    pub fn data_depth(&self) -> usize {
        self.ds.len()
    }

    pub fn pop_float(&mut self) -> Qresult1<Qfloat> {
        Ok(self.fs.pop()?.float())
    }

    /*
     * Output.  Everything the machine prints funnels through here so
     * tests can capture it instead of reading stdout.
     */

    pub fn capture_output(&mut self) {
        self.out = Some(Vec::new());
    }

    pub fn take_output(&mut self) -> String {
        match self.out.take() {
            Some(buf) => {
                self.out = Some(Vec::new());
                String::from_utf8_lossy(&buf).into_owned()
            }
            None => String::new(),
        }
    }

    pub fn print_bytes(&mut self, bytes: &[u8]) {
        match &mut self.out {
            Some(buf) => buf.extend_from_slice(bytes),
            None => {
                let _ = std::io::stdout().write_all(bytes);
            }
        }
    }

    pub fn print(&mut self, text: &str) {
        self.print_bytes(text.as_bytes());
    }

    pub fn flush(&mut self) {
        if self.out.is_none() {
            let _ = std::io::stdout().flush();
        }
    }

    /*
     * Memory access.  Addresses are byte offsets into the data space;
     * anything out of bounds is the Forth notion of an invalid memory
     * address, not a crash.
     */

    pub fn bytes(&self, addr: usize, len: usize) -> Qresult1<&[u8]> {
        let end = addr.checked_add(len).ok_or(Qerr::InvalidAddress)?;
        self.mem.get(addr..end).ok_or(Qerr::InvalidAddress)
    }

    pub fn bytes_mut(&mut self, addr: usize, len: usize) -> Qresult1<&mut [u8]> {
        let end = addr.checked_add(len).ok_or(Qerr::InvalidAddress)?;
        self.mem.get_mut(addr..end).ok_or(Qerr::InvalidAddress)
    }

    pub fn fetch_cell(&self, addr: usize) -> Qresult1<Cell> {
        let bytes = self.bytes(addr, CELL)?;
        let bytes: [u8; CELL] = bytes.try_into().map_err(|_| Qerr::InvalidAddress)?;
        Ok(Cell(Qint::from_le_bytes(bytes)))
    }

    pub fn store_cell(&mut self, addr: usize, x: Cell) -> Qresult {
        self.bytes_mut(addr, CELL)?.copy_from_slice(&x.0.to_le_bytes());
        OK
    }

    pub fn fetch_byte(&self, addr: usize) -> Qresult1<u8> {
        self.mem.get(addr).copied().ok_or(Qerr::InvalidAddress)
    }

    pub fn store_byte(&mut self, addr: usize, b: u8) -> Qresult {
        *self.mem.get_mut(addr).ok_or(Qerr::InvalidAddress)? = b;
        OK
    }

    fn sysvar(&self, addr: usize) -> Cell {
        self.fetch_cell(addr).unwrap_or_default()
    }

    pub fn state(&self) -> Qint {
        self.sysvar(STATE_ADDR).int()
    }

    pub fn is_compiling(&self) -> bool {
        self.state() == STATE_COMPILE
    }

    fn set_state(&mut self, state: Qint) {
        let _ = self.store_cell(STATE_ADDR, Cell(state));
    }

    pub fn radix(&self) -> Quint {
        self.sysvar(BASE_ADDR).uint()
    }

    pub fn set_radix(&mut self, base: Quint) {
        let _ = self.store_cell(BASE_ADDR, Cell::from_uint(base));
    }

    pub fn in_offset(&self) -> usize {
        self.sysvar(TO_IN_ADDR).addr()
    }

    fn set_in_offset(&mut self, offset: usize) {
        let _ = self.store_cell(TO_IN_ADDR, Cell::from_addr(offset));
    }

    pub fn is_interactive(&self) -> bool {
        !self.is_compiling() && self.input.is_terminal() && self.tty
    }

    /*
     * Dictionary.
     */

    /// Newest-first case-insensitive lookup; HIDDEN entries and empty
    /// names never match, so a word under construction cannot call
    /// itself by name.
    pub fn find_name(&self, name: &[u8]) -> Option<Xt> {
        self.dict
            .iter()
            .rposition(|w| {
                !w.is_hidden()
                    && !w.name.is_empty()
                    && w.name.len() == name.len()
                    && w.name.as_bytes().eq_ignore_ascii_case(name)
            })
            .map(Xt)
    }

    /// Exact-name lookup that sees hidden entries; boot only.
    fn find_any(&self, name: &str) -> Qresult1<Xt> {
        self.dict
            .iter()
            .rposition(|w| w.name == name)
            .map(Xt)
            .ok_or(Qerr::Undefined)
    }

    pub(crate) fn word(&self, xt: Xt) -> Qresult1<&Word> {
        self.dict.get(xt.0).ok_or(Qerr::InvalidAddress)
    }

    fn head(&mut self) -> Qresult1<&mut Word> {
        self.dict.last_mut().ok_or(Qerr::InvalidAddress)
    }

    /*
     * Data-space allocator.
     */

    pub fn allot(&mut self, n: Qint) -> Qresult1<usize> {
        let new_here = self.here as Qint + n;
        if new_here < 0 || self.heap as Qint <= new_here {
            return Err(Qerr::Allocate);
        }
        let base = self.dict.last().map(|w| w.addr).unwrap_or(DATA_ORIGIN);
        if (new_here as usize) < base {
            // releasing space below the newest word's committed data
            return Err(Qerr::Resize);
        }
        let start = self.here;
        #[cfg(debug_assertions)]
        if n > 0 {
            self.mem[start..start + n as usize].fill(POISON);
        }
        if let Some(w) = self.dict.last_mut() {
            w.ndata = (w.ndata as Qint + n) as usize;
        }
        self.here = new_here as usize;
        Ok(start)
    }

    pub fn align(&mut self) -> Qresult {
        let pad = cell_align(self.here) - self.here;
        if pad != 0 {
            self.allot(pad as Qint)?;
        }
        OK
    }

    pub fn word_create(&mut self, name: String, code: Code) -> Qresult1<Xt> {
        self.align()?;
        let addr = self.here;
        self.dict.push(Word { name, bits: 0, code, addr, ndata: 0 });
        Ok(Xt(self.dict.len() - 1))
    }

    pub fn word_append(&mut self, x: Cell) -> Qresult {
        self.align()?;
        let addr = self.allot(CELL as Qint)?;
        self.store_cell(addr, x)
    }

    pub fn word_append_byte(&mut self, b: u8) -> Qresult {
        let addr = self.allot(1)?;
        self.store_byte(addr, b)
    }

    fn insert_code(&mut self, name: &str, code: Code, bits: u8) -> Qresult {
        let xt = self.word_create(name.to_string(), code)?;
        self.dict[xt.0].bits = bits;
        OK
    }

    pub(crate) fn insert_native(&mut self, name: &str, f: WordFn, bits: u8) -> Qresult {
        self.insert_code(name, Code::Native(f), bits)
    }

    /*
     * Inner interpreter.
     */

    /// Prime the trampoline with `xt` and run threaded code until the
    /// trailing `_repl` token hands control back.
    pub fn execute(&mut self, xt: Xt) -> Qresult {
        let saved_ip = self.ip;
        self.store_cell(EXEC_ADDR, Cell::from_xt(xt))?;
        self.ip = EXEC_ADDR;
        let result = self.inner();
        self.ip = saved_ip;
        result
    }

    fn inner(&mut self) -> Qresult {
        loop {
            if INTERRUPTED.swap(false, Ordering::Relaxed) {
                return Err(Qerr::SigInt);
            }
            let token = self.fetch_cell(self.ip)?;
            self.ip += CELL;
            if self.dispatch(token.xt()?)? {
                return OK;
            }
        }
    }

    /// One indirect-threaded dispatch.  Returns true when the
    /// trampoline exit runs.
    fn dispatch(&mut self, xt: Xt) -> Qresult1<bool> {
        let mut xt = xt;
        loop {
            let word = self.word(xt)?;
            let code = word.code;
            let addr = word.addr;
            match code {
                Code::Repl => return Ok(true),
                Code::Execute => {
                    xt = self.ds.pop()?.xt()?;
                    continue;
                }
                Code::Enter => {
                    self.rs.push(Cell::from_addr(self.ip))?;
                    self.ip = addr;
                }
                Code::Exit => self.ip = self.rs.pop()?.addr(),
                Code::Lit => {
                    let x = self.fetch_cell(self.ip)?;
                    self.ip += CELL;
                    self.ds.push(x)?;
                }
                Code::Flit => {
                    let x = self.fetch_cell(self.ip)?;
                    self.ip += CELL;
                    self.fs.push(x)?;
                }
                Code::Slit => {
                    let len = self.fetch_cell(self.ip)?.addr();
                    self.ds.push(Cell::from_addr(self.ip + CELL))?;
                    self.ds.push(Cell::from_addr(len))?;
                    self.ip += CELL + cell_align(len);
                }
                Code::Branch => self.branch()?,
                Code::BranchZ => {
                    if self.ds.pop()?.is_true() {
                        self.ip += CELL;
                    } else {
                        self.branch()?;
                    }
                }
                Code::Call => {
                    self.rs.push(Cell::from_addr(self.ip + CELL))?;
                    self.branch()?;
                }
                Code::DataField => self.ds.push(Cell::from_addr(addr + CELL))?,
                Code::DoDoes => {
                    self.ds.push(Cell::from_addr(addr + CELL))?;
                    self.rs.push(Cell::from_addr(self.ip))?;
                    self.ip = self.fetch_cell(addr)?.addr();
                }
                Code::Longjmp => {
                    let n = self.ds.pop()?.int();
                    if n != 0 {
                        return Err(Qerr::from_code(n));
                    }
                }
                Code::Marker => {
                    self.here = addr;
                    self.dict.truncate(xt.0);
                }
                Code::Native(f) => f(self)?,
            }
            return Ok(false);
        }
    }

    /// Displacements are bytes measured from the slot that holds them.
    fn branch(&mut self) -> Qresult {
        let d = self.fetch_cell(self.ip)?.int();
        let ip = self.ip as Qint + d;
        if ip < 0 {
            return Err(Qerr::InvalidAddress);
        }
        self.ip = ip as usize;
        OK
    }

    /*
     * Tokeniser.
     */

    /// Scan for "ccc<delim>"; a space delimiter also stops on any
    /// control character.  With `escape` set, backslash sequences are
    /// squeezed out of the buffer in place, so the buffer shrinks.
    pub fn parse(&mut self, delim: u8, escape: bool) -> Qresult1<(usize, usize)> {
        let buf = self.input.buf;
        self.bytes(buf, self.input.len)?;
        let start = self.in_offset().min(self.input.len);
        let mut off = start;
        if !escape && delim != b' ' {
            let hay = self.bytes(buf + off, self.input.len - off)?;
            off += memchr::memchr(delim, hay).unwrap_or(hay.len());
        } else {
            while off < self.input.len {
                let ch = self.fetch_byte(buf + off)?;
                if escape && ch == b'\\' && off + 1 < self.input.len {
                    let at = buf + off;
                    self.mem.copy_within(at + 1..buf + self.input.len, at);
                    let translated = char_literal(self.fetch_byte(at)?);
                    self.store_byte(at, translated)?;
                    self.input.len -= 1;
                    off += 1;
                    continue;
                }
                if ch == delim || (delim == b' ' && ch.is_ascii_control()) {
                    break;
                }
                off += 1;
            }
        }
        // step past the delimiter, unless the buffer ran out
        self.set_in_offset(off + (off < self.input.len) as usize);
        Ok((buf + start, off - start))
    }

    pub fn parse_name(&mut self) -> Qresult1<(usize, usize)> {
        let mut off = self.in_offset();
        while off < self.input.len && self.fetch_byte(self.input.buf + off)?.is_ascii_whitespace() {
            off += 1;
        }
        self.set_in_offset(off);
        self.parse(b' ', false)
    }

    fn parse_word_name(&mut self) -> Qresult1<String> {
        let (addr, len) = self.parse_name()?;
        if len == 0 {
            return Err(Qerr::EmptyName);
        }
        Ok(String::from_utf8_lossy(self.bytes(addr, len)?).into_owned())
    }

    /// Echo the input buffer with a caret under the parse offset.
    /// Tabs become spaces so the caret lines up.
    pub fn show_input_pointer(&mut self) {
        let text = match self.bytes(self.input.buf, self.input.len) {
            Ok(bytes) => {
                let mut line: String = bytes
                    .iter()
                    .map(|&b| if b == b'\t' { ' ' } else { b as char })
                    .collect();
                if line.ends_with('\n') {
                    line.pop();
                }
                let col = self.in_offset().max(1);
                format!(">> {}\n>> {caret:>col$}\n", line, caret = "^", col = col)
            }
            Err(_) => return,
        };
        self.print(&text);
    }

    /*
     * Input sources.
     */

    fn needs_tib(input: &Input) -> bool {
        matches!(input.kind, SourceKind::Terminal | SourceKind::File { .. })
    }

    fn next_tib(&self) -> Qresult1<usize> {
        let n = self.sources.iter().filter(|i| Self::needs_tib(i)).count()
            + Self::needs_tib(&self.input) as usize;
        if TIB_DEPTH <= n {
            return Err(Qerr::Allocate);
        }
        Ok(TIB_ADDR + n * TIB_SIZE)
    }

    fn push_source(&mut self, input: Input) -> Qresult {
        let mut old = std::mem::replace(&mut self.input, input);
        old.offset = self.in_offset();
        old.blk = self.sysvar(BLK_ADDR).uint();
        self.sources.push(old);
        let offset = self.input.offset;
        let blk = self.input.blk;
        self.set_in_offset(offset);
        self.store_cell(BLK_ADDR, Cell::from_uint(blk))?;
        OK
    }

    fn pop_source(&mut self) {
        if let Some(prev) = self.sources.pop() {
            self.set_in_offset(prev.offset);
            let _ = self.store_cell(BLK_ADDR, Cell::from_uint(prev.blk));
            self.input = prev;
        }
    }

    fn read_source_line(&mut self) -> Qresult1<Option<String>> {
        let mut line = String::new();
        let n = match &mut self.input.kind {
            SourceKind::Terminal => {
                std::io::stdin().read_line(&mut line).map_err(|_| Qerr::IoError)?
            }
            SourceKind::File { reader, .. } => {
                reader.read_line(&mut line).map_err(|_| Qerr::IoError)?
            }
            _ => return Ok(None),
        };
        if n == 0 {
            Ok(None)
        } else {
            Ok(Some(line))
        }
    }

    /// Read the next line of the current source into its buffer.
    /// String and block sources are never refilled.
    pub fn refill(&mut self) -> Qresult1<bool> {
        match self.read_source_line()? {
            None => Ok(false),
            Some(line) => {
                let bytes = line.as_bytes();
                let n = bytes.len().min(self.input.size);
                let buf = self.input.buf;
                self.bytes_mut(buf, n)?.copy_from_slice(&bytes[..n]);
                self.input.len = n;
                self.set_in_offset(0);
                Ok(true)
            }
        }
    }

    /*
     * Outer interpreter.
     */

    /// Consume the current input buffer: look each name up, execute or
    /// compile it, or fall back to the numeric literal parser.
    fn text_loop(&mut self) -> Qresult {
        while self.in_offset() < self.input.len {
            let (addr, len) = self.parse_name()?;
            if len == 0 {
                break;
            }
            let name = self.bytes(addr, len)?.to_vec();
            match self.find_name(&name) {
                Some(xt) => {
                    let word = self.word(xt)?;
                    let immediate = word.is_immediate();
                    let compile_only = word.is_compile_only();
                    if self.is_compiling() && !immediate {
                        self.word_append(Cell::from_xt(xt))?;
                    } else if !self.is_compiling() && compile_only {
                        self.print(&format!("\"{}\" ", String::from_utf8_lossy(&name)));
                        return Err(Qerr::CompileOnly);
                    } else {
                        self.execute(xt)?;
                    }
                }
                None => {
                    let (consumed, x, is_float) = str_num(&name, self.radix())?;
                    if consumed != len {
                        self.print(&format!("\"{}\" ", String::from_utf8_lossy(&name)));
                        return Err(Qerr::Undefined);
                    }
                    if self.is_compiling() {
                        let lit = if is_float { self.prims.flit } else { self.prims.lit };
                        self.word_append(Cell::from_xt(lit))?;
                        self.word_append(x)?;
                    } else if is_float {
                        self.fs.push(x)?;
                    } else {
                        self.ds.push(x)?;
                    }
                }
            }
        }
        OK
    }

    fn source_loop(&mut self) -> Qresult {
        loop {
            self.text_loop()?;
            if self.is_interactive() {
                self.print("ok ");
                self.flush();
            }
            if !self.refill()? {
                break;
            }
        }
        OK
    }

    /// Interpret one line of text as if it arrived from the terminal.
    /// Compilation state persists across calls, so a definition may
    /// span several lines.
    pub fn interpret(&mut self, text: &str) -> Qresult {
        let bytes = text.as_bytes();
        if self.input.size < bytes.len() {
            return Err(Qerr::Throw(-18));
        }
        let buf = self.input.buf;
        self.bytes_mut(buf, bytes.len())?.copy_from_slice(bytes);
        self.input.len = bytes.len();
        self.set_in_offset(0);
        self.text_loop()
    }

    /// EVALUATE: run a string already in data space as a nested input
    /// source, restoring the prior source on every exit path.
    pub fn eval_string(&mut self, addr: usize, len: usize) -> Qresult {
        self.bytes(addr, len)?;
        self.push_source(Input::string(addr, len))?;
        let result = self.source_loop();
        self.pop_source();
        result
    }

    /// Interpret a file, line by line.
    pub fn eval_file(&mut self, path: &str) -> Qresult {
        let file = std::fs::File::open(path).map_err(|_| Qerr::NoSuchFile)?;
        let tib = self.next_tib()?;
        self.push_source(Input::file(path.to_string(), file, tib, TIB_SIZE))?;
        let result = self.source_loop();
        self.pop_source();
        result
    }

    /// INCLUDED: resolve `file` against the colon-separated search
    /// path before interpreting it.
    pub fn include(&mut self, file: &str) -> Qresult {
        use std::path::Path;
        if Path::new(file).is_absolute() {
            return self.eval_file(file);
        }
        let path = std::env::var("QUARTH_PATH").unwrap_or_else(|_| ".".to_string());
        for dir in path.split(':') {
            let candidate = Path::new(dir).join(file);
            if candidate.is_file() {
                if let Some(text) = candidate.to_str() {
                    let text = text.to_string();
                    return self.eval_file(&text);
                }
            }
        }
        Err(Qerr::NoSuchFile)
    }

    /// LOAD: interpret the contents of a block.
    pub fn load_block(&mut self, number: Quint) -> Qresult {
        block::block_buffer(self, number, true)?;
        self.push_source(Input::block(number, BLOCK_ADDR, block::BLOCK_SIZE))?;
        let result = self.source_loop();
        self.pop_source();
        result
    }

    /// Top-level driver for a non-interactive standard input.
    pub fn eval(&mut self) -> i64 {
        loop {
            match self.source_loop() {
                Ok(()) => return 0,
                Err(Qerr::Bye) => return 0,
                Err(e) => {
                    self.exception(e);
                }
            }
        }
    }

    /// The REPL landing pad.  Resets stacks according to the class of
    /// the throw, reports it, and discards any definition that was in
    /// progress.  Returns the throw code.
    pub fn exception(&mut self, e: Qerr) -> i64 {
        if e == Qerr::Bye {
            return 0;
        }
        let code = e.code();
        match code {
            -1 | -2 | -3 | -4 => {
                self.fs.reset();
                self.ds.reset();
                self.rs.reset();
            }
            -5 | -6 | -7 | -9 | -13 | -56 => self.rs.reset(),
            _ => (),
        }
        let discard = self.dict.last().map(|w| w.is_hidden()).unwrap_or(false);
        let silent = matches!(code, -1 | -2 | -56);
        if !silent {
            let mut report = format!("{} thrown: {}", code, e.message());
            if discard {
                if let Some(w) = self.dict.last() {
                    let name = if w.name.is_empty() { ":NONAME" } else { w.name.as_str() };
                    report.push_str(&format!(" while compiling \"{}\"", name));
                }
            }
            report.push('\n');
            self.print(&report);
            self.flush();
        }
        if discard {
            if let Some(w) = self.dict.pop() {
                // rewind HERE; ALLOCATE blocks are not reclaimed
                self.here = w.addr;
            }
        }
        self.set_state(STATE_INTERPRET);
        code
    }

    /*
     * Definition lifecycle.
     */

    fn pack_depths(&self) -> Cell {
        Cell((((self.rs.len() & 0xff) << 8) | (self.ds.len() & 0xff)) as Qint)
    }

    fn begin_definition(&mut self, name: String) -> Qresult {
        let sentinel = self.pack_depths();
        self.ds.push(sentinel)?;
        self.set_state(STATE_COMPILE);
        let xt = self.word_create(name, Code::Enter)?;
        self.dict[xt.0].bits |= BIT_HIDDEN;
        OK
    }

    fn compile_slit(&mut self, bytes: &[u8]) -> Qresult {
        self.word_append(Cell::from_xt(self.prims.slit))?;
        self.word_append(Cell(bytes.len() as Qint))?;
        let dst = self.allot(cell_align(bytes.len()) as Qint)?;
        self.bytes_mut(dst, bytes.len())?.copy_from_slice(bytes);
        OK
    }

    fn patch_branch(&mut self, orig: usize) -> Qresult {
        let base = self.dict.last().map(|w| w.addr).unwrap_or(DATA_ORIGIN);
        if orig < base || self.here <= orig {
            return Err(Qerr::BadControl);
        }
        self.store_cell(orig, Cell(self.here as Qint - orig as Qint))
    }

    /// Emit a branch token plus a displacement slot; returns the slot
    /// address for later patching.
    fn emit_branch(&mut self, xt: Xt, dest: Option<usize>) -> Qresult1<usize> {
        self.word_append(Cell::from_xt(xt))?;
        self.align()?;
        let slot = self.here;
        let disp = dest.map(|d| d as Qint - slot as Qint).unwrap_or(0);
        self.word_append(Cell(disp))?;
        Ok(slot)
    }

    fn tick(&mut self) -> Qresult1<Xt> {
        let (addr, len) = self.parse_name()?;
        let name = self.bytes(addr, len)?.to_vec();
        match self.find_name(&name) {
            Some(xt) => Ok(xt),
            None => {
                self.print(&format!("\"{}\" ", String::from_utf8_lossy(&name)));
                self.show_input_pointer();
                Err(Qerr::Undefined)
            }
        }
    }

    /*
     * Built-in dictionary.
     */

    fn resolve_prims(&mut self) -> Qresult {
        self.prims = Prims {
            lit: self.find_any("LIT")?,
            flit: self.find_any("_flit")?,
            slit: self.find_any("_slit")?,
            exit: self.find_any("EXIT")?,
            branch: self.find_any("_branch")?,
            branchz: self.find_any("_branchz")?,
            do_rt: self.find_any("_do")?,
            loop_rt: self.find_any("_loop")?,
            unloop: self.find_any("UNLOOP")?,
            type_: self.find_any("TYPE")?,
            throw: self.find_any("THROW")?,
            compile_comma: self.find_any("COMPILE,")?,
        };
        OK
    }

    fn load_core(&mut self) -> Qresult {
        const IMM: u8 = BIT_IMMEDIATE;
        const CO: u8 = BIT_COMPILE_ONLY;

        // words the inner interpreter dispatches directly
        for (name, code, bits) in [
            ("_repl", Code::Repl, BIT_HIDDEN),
            ("LIT", Code::Lit, 0),
            ("_flit", Code::Flit, BIT_HIDDEN),
            ("_slit", Code::Slit, CO),
            ("EXIT", Code::Exit, CO),
            ("_branch", Code::Branch, CO),
            ("_branchz", Code::BranchZ, CO),
            ("_call", Code::Call, CO),
            ("EXECUTE", Code::Execute, 0),
            ("THROW", Code::Longjmp, 0),
        ] {
            self.insert_code(name, code, bits)?;
        }

        struct Def(&'static str, WordFn, u8);
        for Def(name, xf, bits) in [
            // defining words
            Def(":", core_word_colon, 0),
            Def(";", core_word_semicolon, IMM | CO),
            Def(":NONAME", core_word_noname, 0),
            Def("CREATE", core_word_create, 0),
            Def("DOES>", core_word_does, CO),
            Def(">BODY", core_word_body, 0),
            Def("MARKER", core_word_marker, 0),
            Def("IMMEDIATE", core_word_immediate, IMM),
            Def("immediate?", core_word_is_immediate, 0),
            Def("compile-only", core_word_compile_only, IMM),
            Def("compile-only?", core_word_is_compile_only, 0),
            Def("'", core_word_tick, 0),
            Def("[']", core_word_bracket_tick, IMM | CO),
            Def("[", core_word_lbracket, IMM | CO),
            Def("]", core_word_rbracket, 0),
            Def("LITERAL", core_word_literal, IMM | CO),
            Def("POSTPONE", core_word_postpone, IMM | CO),
            Def("COMPILE,", core_word_compile_comma, 0),
            Def("RECURSE", core_word_recurse, IMM | CO),
            Def("CHAR", core_word_char, 0),
            Def("[CHAR]", core_word_bracket_char, IMM | CO),
            Def("STATE", core_word_state, 0),
            // control flow
            Def("IF", core_word_if, IMM | CO),
            Def("ELSE", core_word_else, IMM | CO),
            Def("THEN", core_word_then, IMM | CO),
            Def("BEGIN", core_word_begin, IMM | CO),
            Def("AGAIN", core_word_again, IMM | CO),
            Def("UNTIL", core_word_until, IMM | CO),
            Def("WHILE", core_word_while, IMM | CO),
            Def("REPEAT", core_word_repeat, IMM | CO),
            Def("DO", core_word_do, IMM | CO),
            Def("LOOP", core_word_loop, IMM | CO),
            Def("_do", core_word_do_rt, 0),
            Def("_loop", core_word_loop_rt, 0),
            Def("UNLOOP", core_word_unloop, CO),
            Def("I", core_word_counter_i, CO),
            Def("J", core_word_counter_j, CO),
            // exceptions
            Def("CATCH", core_word_catch, 0),
            Def("ABORT", core_word_abort, 0),
            Def("ABORT\"", core_word_abort_quote, IMM | CO),
            Def("QUIT", core_word_quit, 0),
            Def("BYE", core_word_bye, 0),
            // strings and comments
            Def("S\"", core_word_s_quote, IMM),
            Def(".\"", core_word_dot_quote, IMM),
            Def(".(", core_word_dot_paren, IMM),
            Def("(", core_word_paren, IMM),
            Def("\\", core_word_backslash, IMM),
            // stack manipulation
            Def("DUP", core_word_dup, 0),
            Def("?DUP", core_word_question_dup, 0),
            Def("DROP", core_word_drop, 0),
            Def("SWAP", core_word_swap, 0),
            Def("OVER", core_word_over, 0),
            Def("ROT", core_word_rot, 0),
            Def("NIP", core_word_nip, 0),
            Def("TUCK", core_word_tuck, 0),
            Def("PICK", core_word_pick, 0),
            Def("ROLL", core_word_roll, 0),
            Def("DEPTH", core_word_depth, 0),
            Def("2DUP", core_word_two_dup, 0),
            Def("2DROP", core_word_two_drop, 0),
            Def(">R", core_word_to_rs, 0),
            Def("R>", core_word_from_rs, 0),
            Def("R@", core_word_rs_fetch, 0),
            // memory
            Def("@", core_word_fetch, 0),
            Def("!", core_word_store, 0),
            Def("C@", core_word_cfetch, 0),
            Def("C!", core_word_cstore, 0),
            Def("+!", core_word_plus_store, 0),
            Def(",", core_word_comma, 0),
            Def("C,", core_word_ccomma, 0),
            Def("MOVE", core_word_move, 0),
            Def("FILL", core_word_fill, 0),
            Def("COUNT", core_word_count, 0),
            Def("ALLOT", core_word_allot, 0),
            Def("ALIGN", core_word_align, 0),
            Def("ALIGNED", core_word_aligned, 0),
            Def("HERE", core_word_here, 0),
            Def(">here", core_word_here_offset, 0),
            Def("UNUSED", core_word_unused, 0),
            Def("PAD", core_word_pad, 0),
            Def("CELLS", core_word_cells, 0),
            Def("CELL+", core_word_cell_plus, 0),
            Def("CHARS", core_word_chars, 0),
            Def("CHAR+", core_word_char_plus, 0),
            Def("BASE", core_word_base, 0),
            Def(">IN", core_word_to_in, 0),
            Def("BLK", core_word_blk, 0),
            Def("ALLOCATE", core_word_allocate, 0),
            Def("FREE", core_word_free, 0),
            Def("RESIZE", core_word_resize, 0),
            // terminal and parsing
            Def("EMIT", core_word_emit, 0),
            Def("TYPE", core_word_type, 0),
            Def("CR", core_word_cr, 0),
            Def("SPACE", core_word_space, 0),
            Def("SPACES", core_word_spaces, 0),
            Def("BL", core_word_bl, 0),
            Def(".", core_word_dot, 0),
            Def("U.", core_word_u_dot, 0),
            Def(".S", core_word_dot_s, 0),
            Def("KEY", core_word_key, 0),
            Def("ACCEPT", core_word_accept, 0),
            Def("REFILL", core_word_refill, 0),
            Def("SOURCE", core_word_source, 0),
            Def("SOURCE-ID", core_word_source_id, 0),
            Def("PARSE", core_word_parse, 0),
            Def("PARSE-NAME", core_word_parse_name, 0),
            Def("FIND-NAME", core_word_find_name, 0),
            Def("EVALUATE", core_word_evaluate, 0),
            Def("INCLUDED", core_word_included, 0),
            Def("MS", core_word_ms, 0),
            Def("argc", core_word_argc, 0),
            Def("arg", core_word_arg, 0),
            // tools
            Def("WORDS", core_word_words, 0),
            Def("SEE", core_word_see, 0),
            Def("DUMP", core_word_dump, 0),
            Def("_bp", core_word_bp, IMM),
        ] {
            self.insert_native(name, xf, bits)?;
        }

        arith_load(self)?;
        block::block_load(self)?;
        OK
    }
}

/*
 * Defining words.
 */

fn core_word_colon(xs: &mut Machine) -> Qresult {
    if xs.is_compiling() {
        return Err(Qerr::Compiling);
    }
    let (addr, len) = xs.parse_name()?;
    let name = String::from_utf8_lossy(xs.bytes(addr, len)?).into_owned();
    xs.begin_definition(name)
}

fn core_word_noname(xs: &mut Machine) -> Qresult {
    xs.begin_definition(String::new())
}

fn core_word_semicolon(xs: &mut Machine) -> Qresult {
    let sentinel = xs.ds.pop()?;
    if sentinel != xs.pack_depths() {
        // an unclosed IF/BEGIN/DO left its origin on the stack
        return Err(Qerr::BadControl);
    }
    xs.word_append(Cell::from_xt(xs.prims.exit))?;
    let noname = {
        let head = xs.head()?;
        head.bits &= !BIT_HIDDEN;
        head.name.is_empty()
    };
    xs.set_state(STATE_INTERPRET);
    if noname {
        let xt = Xt(xs.dict.len() - 1);
        xs.ds.push(Cell::from_xt(xt))?;
    }
    OK
}

fn core_word_create(xs: &mut Machine) -> Qresult {
    let name = xs.parse_word_name()?;
    let xt = xs.word_create(name, Code::DataField)?;
    // reserve the first data cell for a DOES> continuation
    xs.word_append(Cell(0))?;
    xs.dict[xt.0].bits |= BIT_CREATED;
    OK
}

fn core_word_does(xs: &mut Machine) -> Qresult {
    let ip = xs.ip;
    let addr = {
        let head = xs.head()?;
        if !head.is_created() {
            return Err(Qerr::NotCreated);
        }
        head.code = Code::DoDoes;
        head.addr
    };
    // the continuation is the code after DOES> in the defining word
    xs.store_cell(addr, Cell::from_addr(ip))?;
    // return from the defining word
    xs.ip = xs.rs.pop()?.addr();
    OK
}

fn core_word_body(xs: &mut Machine) -> Qresult {
    let xt = xs.ds.pop()?.xt()?;
    let word = xs.word(xt)?;
    if !word.is_created() {
        return Err(Qerr::NotCreated);
    }
    let addr = word.addr + CELL;
    xs.ds.push(Cell::from_addr(addr))
}

fn core_word_marker(xs: &mut Machine) -> Qresult {
    let name = xs.parse_word_name()?;
    xs.word_create(name, Code::Marker)?;
    OK
}

fn core_word_immediate(xs: &mut Machine) -> Qresult {
    xs.head()?.bits |= BIT_IMMEDIATE;
    OK
}

fn core_word_is_immediate(xs: &mut Machine) -> Qresult {
    let xt = xs.ds.pop()?.xt()?;
    let flag = xs.word(xt)?.is_immediate();
    xs.ds.push(Cell::from_bool(flag))
}

fn core_word_compile_only(xs: &mut Machine) -> Qresult {
    xs.head()?.bits |= BIT_COMPILE_ONLY;
    OK
}

fn core_word_is_compile_only(xs: &mut Machine) -> Qresult {
    let xt = xs.ds.pop()?.xt()?;
    let flag = xs.word(xt)?.is_compile_only();
    xs.ds.push(Cell::from_bool(flag))
}

fn core_word_tick(xs: &mut Machine) -> Qresult {
    let xt = xs.tick()?;
    xs.ds.push(Cell::from_xt(xt))
}

fn core_word_bracket_tick(xs: &mut Machine) -> Qresult {
    let xt = xs.tick()?;
    xs.word_append(Cell::from_xt(xs.prims.lit))?;
    xs.word_append(Cell::from_xt(xt))
}

fn core_word_lbracket(xs: &mut Machine) -> Qresult {
    xs.set_state(STATE_INTERPRET);
    OK
}

fn core_word_rbracket(xs: &mut Machine) -> Qresult {
    xs.set_state(STATE_COMPILE);
    OK
}

fn core_word_literal(xs: &mut Machine) -> Qresult {
    let x = xs.ds.pop()?;
    xs.word_append(Cell::from_xt(xs.prims.lit))?;
    xs.word_append(x)
}

fn core_word_postpone(xs: &mut Machine) -> Qresult {
    let xt = xs.tick()?;
    if xs.word(xt)?.is_immediate() {
        xs.word_append(Cell::from_xt(xt))
    } else {
        // defer the append to the run time of the word being defined
        xs.word_append(Cell::from_xt(xs.prims.lit))?;
        xs.word_append(Cell::from_xt(xt))?;
        xs.word_append(Cell::from_xt(xs.prims.compile_comma))
    }
}

fn core_word_compile_comma(xs: &mut Machine) -> Qresult {
    let xt = xs.ds.pop()?.xt()?;
    xs.word(xt)?;
    xs.word_append(Cell::from_xt(xt))
}

fn core_word_recurse(xs: &mut Machine) -> Qresult {
    let xt = Xt(xs.dict.len().saturating_sub(1));
    xs.word_append(Cell::from_xt(xt))
}

fn core_word_char(xs: &mut Machine) -> Qresult {
    let (addr, len) = xs.parse_name()?;
    if len == 0 {
        return Err(Qerr::EmptyName);
    }
    let ch = xs.fetch_byte(addr)?;
    xs.ds.push(Cell(ch as Qint))
}

fn core_word_bracket_char(xs: &mut Machine) -> Qresult {
    let (addr, len) = xs.parse_name()?;
    if len == 0 {
        return Err(Qerr::EmptyName);
    }
    let ch = xs.fetch_byte(addr)?;
    xs.word_append(Cell::from_xt(xs.prims.lit))?;
    xs.word_append(Cell(ch as Qint))
}

fn core_word_state(xs: &mut Machine) -> Qresult {
    xs.ds.push(Cell::from_addr(STATE_ADDR))
}

/*
 * Control flow.  The compile-time origins and destinations ride on
 * the data stack, which is what lets the `;` balance check notice an
 * unclosed structure.
 */

fn core_word_if(xs: &mut Machine) -> Qresult {
    let orig = xs.emit_branch(xs.prims.branchz, None)?;
    xs.ds.push(Cell::from_addr(orig))
}

fn core_word_else(xs: &mut Machine) -> Qresult {
    let if_orig = xs.ds.pop()?.addr();
    let orig = xs.emit_branch(xs.prims.branch, None)?;
    xs.patch_branch(if_orig)?;
    xs.ds.push(Cell::from_addr(orig))
}

fn core_word_then(xs: &mut Machine) -> Qresult {
    let orig = xs.ds.pop()?.addr();
    xs.patch_branch(orig)
}

fn core_word_begin(xs: &mut Machine) -> Qresult {
    xs.align()?;
    xs.ds.push(Cell::from_addr(xs.here))
}

fn core_word_again(xs: &mut Machine) -> Qresult {
    let dest = xs.ds.pop()?.addr();
    xs.emit_branch(xs.prims.branch, Some(dest))?;
    OK
}

fn core_word_until(xs: &mut Machine) -> Qresult {
    let dest = xs.ds.pop()?.addr();
    xs.emit_branch(xs.prims.branchz, Some(dest))?;
    OK
}

fn core_word_while(xs: &mut Machine) -> Qresult {
    let dest = xs.ds.pop()?;
    let orig = xs.emit_branch(xs.prims.branchz, None)?;
    xs.ds.push(Cell::from_addr(orig))?;
    xs.ds.push(dest)
}

fn core_word_repeat(xs: &mut Machine) -> Qresult {
    let dest = xs.ds.pop()?.addr();
    xs.emit_branch(xs.prims.branch, Some(dest))?;
    let orig = xs.ds.pop()?.addr();
    xs.patch_branch(orig)
}

fn core_word_do(xs: &mut Machine) -> Qresult {
    xs.word_append(Cell::from_xt(xs.prims.do_rt))?;
    xs.align()?;
    xs.ds.push(Cell::from_addr(xs.here))
}

fn core_word_loop(xs: &mut Machine) -> Qresult {
    let dest = xs.ds.pop()?.addr();
    xs.word_append(Cell::from_xt(xs.prims.loop_rt))?;
    xs.emit_branch(xs.prims.branchz, Some(dest))?;
    xs.word_append(Cell::from_xt(xs.prims.unloop))
}

// ( limit start -- ) (R: -- limit index )
fn core_word_do_rt(xs: &mut Machine) -> Qresult {
    let start = xs.ds.pop()?;
    let limit = xs.ds.pop()?;
    xs.rs.push(limit)?;
    xs.rs.push(start)
}

// Bump the index; leave a done flag for the backward _branchz.
fn core_word_loop_rt(xs: &mut Machine) -> Qresult {
    let index = xs.rs.pick(0)?.int().wrapping_add(1);
    let limit = xs.rs.pick(1)?.int();
    xs.rs.set_pick(0, Cell(index))?;
    xs.ds.push(Cell::from_bool(limit <= index))
}

fn core_word_unloop(xs: &mut Machine) -> Qresult {
    xs.rs.dropn(2)
}

fn counter_value(xs: &mut Machine, n: usize) -> Qresult {
    let x = xs.rs.pick(n).map_err(|_| Qerr::LoopDepth)?;
    xs.ds.push(x)
}

fn core_word_counter_i(xs: &mut Machine) -> Qresult {
    counter_value(xs, 0)
}

fn core_word_counter_j(xs: &mut Machine) -> Qresult {
    counter_value(xs, 2)
}

/*
 * Exceptions.
 */

fn core_word_catch(xs: &mut Machine) -> Qresult {
    let xt = xs.ds.pop()?.xt()?;
    let ds = xs.ds.len();
    let rs = xs.rs.len();
    let fs = xs.fs.len();
    let depth = xs.sources.len();
    let ip = xs.ip;
    match xs.execute(xt) {
        Ok(()) => xs.ds.push(Cell(0)),
        Err(Qerr::Bye) => Err(Qerr::Bye),
        Err(e) => {
            while depth < xs.sources.len() {
                xs.pop_source();
            }
            xs.ip = ip;
            xs.ds.restore(ds);
            xs.rs.restore(rs);
            xs.fs.restore(fs);
            xs.ds.push(Cell(e.code()))
        }
    }
}

fn core_word_abort(_xs: &mut Machine) -> Qresult {
    Err(Qerr::Abort)
}

fn core_word_abort_quote(xs: &mut Machine) -> Qresult {
    let (addr, len) = xs.parse(b'"', true)?;
    let bytes = xs.bytes(addr, len)?.to_vec();
    let orig = xs.emit_branch(xs.prims.branchz, None)?;
    xs.compile_slit(&bytes)?;
    xs.word_append(Cell::from_xt(xs.prims.type_))?;
    xs.word_append(Cell::from_xt(xs.prims.lit))?;
    xs.word_append(Cell(Qerr::AbortQuote.code()))?;
    xs.word_append(Cell::from_xt(xs.prims.throw))?;
    xs.patch_branch(orig)
}

fn core_word_quit(_xs: &mut Machine) -> Qresult {
    Err(Qerr::Quit)
}

fn core_word_bye(_xs: &mut Machine) -> Qresult {
    Err(Qerr::Bye)
}

/*
 * Strings and comments.
 */

fn core_word_s_quote(xs: &mut Machine) -> Qresult {
    let (addr, len) = xs.parse(b'"', true)?;
    if xs.is_compiling() {
        let bytes = xs.bytes(addr, len)?.to_vec();
        xs.compile_slit(&bytes)
    } else {
        if PAD_SIZE < len {
            return Err(Qerr::Throw(-18));
        }
        let bytes = xs.bytes(addr, len)?.to_vec();
        xs.bytes_mut(PAD_ADDR, len)?.copy_from_slice(&bytes);
        xs.ds.push(Cell::from_addr(PAD_ADDR))?;
        xs.ds.push(Cell(len as Qint))
    }
}

fn core_word_dot_quote(xs: &mut Machine) -> Qresult {
    let (addr, len) = xs.parse(b'"', true)?;
    let bytes = xs.bytes(addr, len)?.to_vec();
    if xs.is_compiling() {
        xs.compile_slit(&bytes)?;
        xs.word_append(Cell::from_xt(xs.prims.type_))
    } else {
        xs.print_bytes(&bytes);
        OK
    }
}

fn core_word_dot_paren(xs: &mut Machine) -> Qresult {
    let (addr, len) = xs.parse(b')', false)?;
    let bytes = xs.bytes(addr, len)?.to_vec();
    xs.print_bytes(&bytes);
    OK
}

fn core_word_paren(xs: &mut Machine) -> Qresult {
    xs.parse(b')', false)?;
    OK
}

fn core_word_backslash(xs: &mut Machine) -> Qresult {
    let len = xs.input.len;
    xs.set_in_offset(len);
    OK
}

/*
 * Stack manipulation.
 */

fn core_word_dup(xs: &mut Machine) -> Qresult {
    let x = xs.ds.top()?;
    xs.ds.push(x)
}

fn core_word_question_dup(xs: &mut Machine) -> Qresult {
    let x = xs.ds.top()?;
    if x.is_true() {
        xs.ds.push(x)?;
    }
    OK
}

fn core_word_drop(xs: &mut Machine) -> Qresult {
    xs.ds.pop()?;
    OK
}

fn core_word_swap(xs: &mut Machine) -> Qresult {
    let a = xs.ds.pop()?;
    let b = xs.ds.pop()?;
    xs.ds.push(a)?;
    xs.ds.push(b)
}

fn core_word_over(xs: &mut Machine) -> Qresult {
    let x = xs.ds.pick(1)?;
    xs.ds.push(x)
}

fn core_word_rot(xs: &mut Machine) -> Qresult {
    xs.ds.can(3, 3)?;
    xs.ds.roll(2)
}

fn core_word_nip(xs: &mut Machine) -> Qresult {
    let a = xs.ds.pop()?;
    xs.ds.pop()?;
    xs.ds.push(a)
}

fn core_word_tuck(xs: &mut Machine) -> Qresult {
    let a = xs.ds.pop()?;
    let b = xs.ds.pop()?;
    xs.ds.push(a)?;
    xs.ds.push(b)?;
    xs.ds.push(a)
}

fn core_word_pick(xs: &mut Machine) -> Qresult {
    let n = xs.ds.pop()?.addr();
    let x = xs.ds.pick(n)?;
    xs.ds.push(x)
}

fn core_word_roll(xs: &mut Machine) -> Qresult {
    let n = xs.ds.pop()?.addr();
    xs.ds.roll(n)
}

fn core_word_depth(xs: &mut Machine) -> Qresult {
    let n = xs.ds.len();
    xs.ds.push(Cell(n as Qint))
}

fn core_word_two_dup(xs: &mut Machine) -> Qresult {
    let b = xs.ds.pick(0)?;
    let a = xs.ds.pick(1)?;
    xs.ds.push(a)?;
    xs.ds.push(b)
}

fn core_word_two_drop(xs: &mut Machine) -> Qresult {
    xs.ds.dropn(2)
}

fn core_word_to_rs(xs: &mut Machine) -> Qresult {
    let x = xs.ds.pop()?;
    xs.rs.push(x)
}

fn core_word_from_rs(xs: &mut Machine) -> Qresult {
    let x = xs.rs.pop()?;
    xs.ds.push(x)
}

fn core_word_rs_fetch(xs: &mut Machine) -> Qresult {
    let x = xs.rs.top()?;
    xs.ds.push(x)
}

/*
 * Memory.
 */

fn core_word_fetch(xs: &mut Machine) -> Qresult {
    let addr = xs.ds.pop()?.addr();
    let x = xs.fetch_cell(addr)?;
    xs.ds.push(x)
}

fn core_word_store(xs: &mut Machine) -> Qresult {
    let addr = xs.ds.pop()?.addr();
    let x = xs.ds.pop()?;
    xs.store_cell(addr, x)
}

fn core_word_cfetch(xs: &mut Machine) -> Qresult {
    let addr = xs.ds.pop()?.addr();
    let b = xs.fetch_byte(addr)?;
    xs.ds.push(Cell(b as Qint))
}

fn core_word_cstore(xs: &mut Machine) -> Qresult {
    let addr = xs.ds.pop()?.addr();
    let b = xs.ds.pop()?.int() as u8;
    xs.store_byte(addr, b)
}

fn core_word_plus_store(xs: &mut Machine) -> Qresult {
    let addr = xs.ds.pop()?.addr();
    let n = xs.ds.pop()?.int();
    let x = xs.fetch_cell(addr)?;
    xs.store_cell(addr, Cell(x.int().wrapping_add(n)))
}

fn core_word_comma(xs: &mut Machine) -> Qresult {
    let x = xs.ds.pop()?;
    xs.word_append(x)
}

fn core_word_ccomma(xs: &mut Machine) -> Qresult {
    let b = xs.ds.pop()?.int() as u8;
    xs.word_append_byte(b)
}

fn core_word_move(xs: &mut Machine) -> Qresult {
    let len = xs.ds.pop()?.addr();
    let dst = xs.ds.pop()?.addr();
    let src = xs.ds.pop()?.addr();
    xs.bytes(src, len)?;
    xs.bytes(dst, len)?;
    xs.mem.copy_within(src..src + len, dst);
    OK
}

fn core_word_fill(xs: &mut Machine) -> Qresult {
    let ch = xs.ds.pop()?.int() as u8;
    let len = xs.ds.pop()?.addr();
    let addr = xs.ds.pop()?.addr();
    xs.bytes_mut(addr, len)?.fill(ch);
    OK
}

fn core_word_count(xs: &mut Machine) -> Qresult {
    let addr = xs.ds.pop()?.addr();
    let len = xs.fetch_byte(addr)?;
    xs.ds.push(Cell::from_addr(addr + 1))?;
    xs.ds.push(Cell(len as Qint))
}

fn core_word_allot(xs: &mut Machine) -> Qresult {
    let n = xs.ds.pop()?.int();
    xs.allot(n)?;
    OK
}

fn core_word_align(xs: &mut Machine) -> Qresult {
    xs.align()
}

fn core_word_aligned(xs: &mut Machine) -> Qresult {
    let addr = xs.ds.pop()?.addr();
    xs.ds.push(Cell::from_addr(cell_align(addr)))
}

fn core_word_here(xs: &mut Machine) -> Qresult {
    let here = xs.here;
    xs.ds.push(Cell::from_addr(here))
}

// HERE as an offset from the newest word's data base.
fn core_word_here_offset(xs: &mut Machine) -> Qresult {
    let base = xs.dict.last().map(|w| w.addr).unwrap_or(DATA_ORIGIN);
    let offset = xs.here - base;
    xs.ds.push(Cell::from_addr(offset))
}

fn core_word_unused(xs: &mut Machine) -> Qresult {
    let n = xs.heap - xs.here;
    xs.ds.push(Cell::from_addr(n))
}

fn core_word_pad(xs: &mut Machine) -> Qresult {
    xs.ds.push(Cell::from_addr(PAD_ADDR))
}

fn core_word_cells(xs: &mut Machine) -> Qresult {
    let n = xs.ds.pop()?.int();
    xs.ds.push(Cell(n.wrapping_mul(CELL as Qint)))
}

fn core_word_cell_plus(xs: &mut Machine) -> Qresult {
    let n = xs.ds.pop()?.int();
    xs.ds.push(Cell(n.wrapping_add(CELL as Qint)))
}

fn core_word_chars(_xs: &mut Machine) -> Qresult {
    // one char is one address unit
    OK
}

fn core_word_char_plus(xs: &mut Machine) -> Qresult {
    let n = xs.ds.pop()?.int();
    xs.ds.push(Cell(n.wrapping_add(1)))
}

fn core_word_base(xs: &mut Machine) -> Qresult {
    xs.ds.push(Cell::from_addr(BASE_ADDR))
}

fn core_word_to_in(xs: &mut Machine) -> Qresult {
    xs.ds.push(Cell::from_addr(TO_IN_ADDR))
}

fn core_word_blk(xs: &mut Machine) -> Qresult {
    xs.ds.push(Cell::from_addr(BLK_ADDR))
}

// ( u -- aaddr ior )
fn core_word_allocate(xs: &mut Machine) -> Qresult {
    let u = cell_align(xs.ds.pop()?.addr().max(1));
    if xs.heap < xs.here + u {
        xs.ds.push(Cell(0))?;
        return xs.ds.push(Cell(Qerr::Allocate.code()));
    }
    xs.heap -= u;
    let addr = xs.heap;
    xs.ds.push(Cell::from_addr(addr))?;
    xs.ds.push(Cell(0))
}

// ( aaddr -- ior )  The space is simply abandoned.
fn core_word_free(xs: &mut Machine) -> Qresult {
    xs.ds.pop()?;
    xs.ds.push(Cell(0))
}

// ( aaddr1 u -- aaddr2 ior )
fn core_word_resize(xs: &mut Machine) -> Qresult {
    let u = cell_align(xs.ds.pop()?.addr().max(1));
    let old = xs.ds.pop()?.addr();
    if xs.heap < xs.here + u {
        xs.ds.push(Cell::from_addr(old))?;
        return xs.ds.push(Cell(Qerr::Resize.code()));
    }
    xs.heap -= u;
    let addr = xs.heap;
    let n = u.min(xs.mem.len().saturating_sub(old));
    xs.mem.copy_within(old..old + n, addr);
    xs.ds.push(Cell::from_addr(addr))?;
    xs.ds.push(Cell(0))
}

/*
 * Terminal and parsing.
 */

fn core_word_emit(xs: &mut Machine) -> Qresult {
    let b = xs.ds.pop()?.int() as u8;
    xs.print_bytes(&[b]);
    OK
}

fn core_word_type(xs: &mut Machine) -> Qresult {
    let len = xs.ds.pop()?.addr();
    let addr = xs.ds.pop()?.addr();
    let bytes = xs.bytes(addr, len)?.to_vec();
    xs.print_bytes(&bytes);
    OK
}

fn core_word_cr(xs: &mut Machine) -> Qresult {
    xs.print("\n");
    OK
}

fn core_word_space(xs: &mut Machine) -> Qresult {
    xs.print(" ");
    OK
}

fn core_word_spaces(xs: &mut Machine) -> Qresult {
    let n = xs.ds.pop()?.int();
    for _ in 0..n.max(0) {
        xs.print(" ");
    }
    OK
}

fn core_word_bl(xs: &mut Machine) -> Qresult {
    xs.ds.push(Cell(b' ' as Qint))
}

fn core_word_dot(xs: &mut Machine) -> Qresult {
    let n = xs.ds.pop()?.int();
    let text = format!("{} ", fmt_int(n, xs.radix()));
    xs.print(&text);
    OK
}

fn core_word_u_dot(xs: &mut Machine) -> Qresult {
    let u = xs.ds.pop()?.uint();
    let text = format!("{} ", fmt_uint(u, xs.radix()));
    xs.print(&text);
    OK
}

fn core_word_dot_s(xs: &mut Machine) -> Qresult {
    let radix = xs.radix();
    let mut text = format!("<{}> ", xs.ds.len());
    for cell in xs.ds.slice() {
        text.push_str(&fmt_int(cell.int(), radix));
        text.push(' ');
    }
    xs.print(&text);
    OK
}

fn core_word_key(xs: &mut Machine) -> Qresult {
    xs.flush();
    let mut byte = [0u8; 1];
    let n = std::io::stdin().read(&mut byte).map_err(|_| Qerr::IoError)?;
    xs.ds.push(Cell(if n == 0 { -1 } else { byte[0] as Qint }))
}

// ( caddr +n1 -- +n2 )
fn core_word_accept(xs: &mut Machine) -> Qresult {
    let size = xs.ds.pop()?.addr();
    let addr = xs.ds.pop()?.addr();
    match xs.read_source_line()? {
        None => xs.ds.push(Cell(-1)),
        Some(line) => {
            let bytes = line.as_bytes();
            let n = bytes.len().min(size);
            xs.bytes_mut(addr, n)?.copy_from_slice(&bytes[..n]);
            xs.ds.push(Cell(n as Qint))
        }
    }
}

fn core_word_refill(xs: &mut Machine) -> Qresult {
    let flag = xs.refill()?;
    xs.ds.push(Cell::from_bool(flag))
}

fn core_word_source(xs: &mut Machine) -> Qresult {
    let buf = xs.input.buf;
    let len = xs.input.len;
    xs.ds.push(Cell::from_addr(buf))?;
    xs.ds.push(Cell(len as Qint))
}

fn core_word_source_id(xs: &mut Machine) -> Qresult {
    let id = xs.input.source_id();
    xs.ds.push(Cell(id))
}

// ( char "ccc<char>" -- caddr u )
fn core_word_parse(xs: &mut Machine) -> Qresult {
    let delim = xs.ds.pop()?.int() as u8;
    let (addr, len) = xs.parse(delim, false)?;
    xs.ds.push(Cell::from_addr(addr))?;
    xs.ds.push(Cell(len as Qint))
}

fn core_word_parse_name(xs: &mut Machine) -> Qresult {
    let (addr, len) = xs.parse_name()?;
    xs.ds.push(Cell::from_addr(addr))?;
    xs.ds.push(Cell(len as Qint))
}

// ( caddr u -- xt | 0 )
fn core_word_find_name(xs: &mut Machine) -> Qresult {
    let len = xs.ds.pop()?.addr();
    let addr = xs.ds.pop()?.addr();
    let name = xs.bytes(addr, len)?.to_vec();
    let found = match xs.find_name(&name) {
        Some(xt) => Cell::from_xt(xt),
        None => Cell(0),
    };
    xs.ds.push(found)
}

fn core_word_evaluate(xs: &mut Machine) -> Qresult {
    let len = xs.ds.pop()?.addr();
    let addr = xs.ds.pop()?.addr();
    xs.eval_string(addr, len)
}

fn core_word_included(xs: &mut Machine) -> Qresult {
    let len = xs.ds.pop()?.addr();
    let addr = xs.ds.pop()?.addr();
    let name = String::from_utf8_lossy(xs.bytes(addr, len)?).into_owned();
    xs.include(&name)
}

fn core_word_ms(xs: &mut Machine) -> Qresult {
    let ms = xs.ds.pop()?.addr() as u64;
    std::thread::sleep(std::time::Duration::from_millis(ms));
    OK
}

fn core_word_argc(xs: &mut Machine) -> Qresult {
    let n = xs.argv.len();
    xs.ds.push(Cell(n as Qint))
}

// ( n -- caddr u )
fn core_word_arg(xs: &mut Machine) -> Qresult {
    let n = xs.ds.pop()?.addr();
    let (addr, len) = *xs.argv.get(n).ok_or(Qerr::ResultOutOfRange)?;
    xs.ds.push(Cell::from_addr(addr))?;
    xs.ds.push(Cell(len as Qint))
}

/*
 * Tools.
 */

fn core_word_words(xs: &mut Machine) -> Qresult {
    let mut text = String::new();
    for w in xs.dict.iter().rev() {
        if w.is_hidden() || w.name.is_empty() {
            continue;
        }
        text.push_str(&w.name);
        text.push(' ');
    }
    text.push('\n');
    xs.print(&text);
    OK
}

fn core_word_see(xs: &mut Machine) -> Qresult {
    let xt = xs.tick()?;
    let text = see(xs, xt);
    xs.print(&text);
    OK
}

fn core_word_dump(xs: &mut Machine) -> Qresult {
    let len = xs.ds.pop()?.addr();
    let addr = xs.ds.pop()?.addr();
    let text = mem_dump(xs, addr, len)?;
    xs.print(&text);
    OK
}

fn core_word_bp(xs: &mut Machine) -> Qresult {
    xs.show_input_pointer();
    OK
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boot() -> Machine {
        Machine::new(Options::default()).unwrap()
    }

    fn pop(xs: &mut Machine) -> Qint {
        xs.pop_data().unwrap().int()
    }

    fn output_of(xs: &mut Machine, line: &str) -> String {
        xs.capture_output();
        xs.interpret(line).unwrap();
        xs.take_output()
    }

    #[test]
    fn test_data_stack_words() {
        let mut xs = boot();
        xs.interpret("1 2 DUP").unwrap();
        assert_eq!(2, pop(&mut xs));
        assert_eq!(2, pop(&mut xs));
        assert_eq!(1, pop(&mut xs));
        xs.interpret("1 2 SWAP").unwrap();
        assert_eq!(1, pop(&mut xs));
        assert_eq!(2, pop(&mut xs));
        xs.interpret("1 2 OVER").unwrap();
        assert_eq!(1, pop(&mut xs));
        assert_eq!(2, pop(&mut xs));
        assert_eq!(1, pop(&mut xs));
        xs.interpret("1 2 3 ROT").unwrap();
        assert_eq!(1, pop(&mut xs));
        assert_eq!(3, pop(&mut xs));
        assert_eq!(2, pop(&mut xs));
        xs.interpret("1 2 NIP").unwrap();
        assert_eq!(2, pop(&mut xs));
        assert_eq!(0, xs.data_depth());
        xs.interpret("1 2 TUCK").unwrap();
        assert_eq!(2, pop(&mut xs));
        assert_eq!(1, pop(&mut xs));
        assert_eq!(2, pop(&mut xs));
        xs.interpret("10 20 30 2 PICK").unwrap();
        assert_eq!(10, pop(&mut xs));
        xs.interpret("DEPTH").unwrap();
        assert_eq!(3, pop(&mut xs));
        xs.interpret("2 ROLL").unwrap();
        assert_eq!(10, pop(&mut xs));
        assert_eq!(30, pop(&mut xs));
        assert_eq!(20, pop(&mut xs));
        xs.interpret("7 ?DUP 0 ?DUP").unwrap();
        assert_eq!(0, pop(&mut xs));
        assert_eq!(7, pop(&mut xs));
        assert_eq!(7, pop(&mut xs));
        assert_eq!(Err(Qerr::StackUnderflow), xs.interpret("DROP"));
        assert_eq!(Err(Qerr::StackUnderflow), xs.interpret("1 SWAP"));
        xs.ds.reset();
        assert!(xs.ds.sentinel_intact());
        assert!(xs.rs.sentinel_intact());
    }

    #[test]
    fn test_return_stack_words() {
        let mut xs = boot();
        xs.interpret(": T 5 >R R@ R> + ; T").unwrap();
        assert_eq!(10, pop(&mut xs));
    }

    #[test]
    fn test_scenario_add_and_print() {
        let mut xs = boot();
        assert_eq!("3 ", output_of(&mut xs, "1 2 + ."));
        assert_eq!(0, xs.data_depth());
    }

    #[test]
    fn test_scenario_square() {
        let mut xs = boot();
        assert_eq!("49 ", output_of(&mut xs, ": SQR DUP * ; 7 SQR ."));
        assert_eq!(0, xs.data_depth());
    }

    #[test]
    fn test_scenario_constant_does() {
        let mut xs = boot();
        let line = ": CONSTANT CREATE , DOES> @ ; 377 CONSTANT MONACO MONACO .";
        assert_eq!("377 ", output_of(&mut xs, line));
        assert_eq!(0, xs.data_depth());
        // printing under HEX
        assert_eq!("179 ", output_of(&mut xs, "HEX MONACO . DECIMAL"));
        // redefining the defining word must not retarget MONACO
        xs.interpret(": CONSTANT 0 ; MONACO").unwrap();
        assert_eq!(377, pop(&mut xs));
    }

    #[test]
    fn test_scenario_marker() {
        let mut xs = boot();
        xs.interpret("MARKER FOO").unwrap();
        let words = xs.dict.len();
        let here = xs.here;
        xs.capture_output();
        let result = xs.interpret("MARKER FOO : BAR 1 ; BAR . FOO BAR");
        assert_eq!(Err(Qerr::Undefined), result);
        assert_eq!("1 \"BAR\" ", xs.take_output());
        // the marker removed itself and everything after it
        assert_eq!(words, xs.dict.len());
        assert_eq!(here, xs.here);
    }

    #[test]
    fn test_scenario_unbalanced_if() {
        let mut xs = boot();
        let result = xs.interpret(": BAD 1 IF ;");
        assert_eq!(Err(Qerr::BadControl), result);
        xs.capture_output();
        xs.exception(Qerr::BadControl);
        let report = xs.take_output();
        assert!(report.contains("while compiling \"BAD\""), "{}", report);
        assert!(xs.find_name(b"BAD").is_none());
    }

    #[test]
    fn test_scenario_radix_prefixes() {
        let mut xs = boot();
        assert_eq!("275 ", output_of(&mut xs, "$FF #10 %1010 + + ."));
    }

    #[test]
    fn test_scenario_do_loop() {
        let mut xs = boot();
        assert_eq!("0 ", output_of(&mut xs, ": T7 1 0 DO I . LOOP ; 0 T7"));
        assert_eq!(0, pop(&mut xs));
        xs.interpret(": TEN 10 0 DO I LOOP ; TEN").unwrap();
        for i in (0..10).rev() {
            assert_eq!(i, pop(&mut xs));
        }
        xs.interpret(": NEST 2 0 DO 12 10 DO J I LOOP LOOP ; NEST").unwrap();
        for j in (0..2).rev() {
            for i in (10..12).rev() {
                assert_eq!(i, pop(&mut xs));
                assert_eq!(j, pop(&mut xs));
            }
        }
    }

    #[test]
    fn test_if_else_then() {
        let mut xs = boot();
        xs.interpret(": T IF 222 ELSE 333 THEN ;").unwrap();
        xs.interpret("1 T").unwrap();
        assert_eq!(222, pop(&mut xs));
        xs.interpret("0 T").unwrap();
        assert_eq!(333, pop(&mut xs));
        xs.interpret(": T2 IF 7 THEN ; 0 T2 1 T2").unwrap();
        assert_eq!(7, pop(&mut xs));
        assert_eq!(0, xs.data_depth());
    }

    #[test]
    fn test_begin_loops() {
        let mut xs = boot();
        xs.interpret(": T 0 BEGIN 1+ DUP 5 = UNTIL ; T").unwrap();
        assert_eq!(5, pop(&mut xs));
        xs.interpret(": W 0 BEGIN DUP 5 < WHILE 1+ REPEAT ; W").unwrap();
        assert_eq!(5, pop(&mut xs));
        xs.interpret(": A 0 BEGIN 1+ DUP 3 = IF EXIT THEN AGAIN ; A").unwrap();
        assert_eq!(3, pop(&mut xs));
    }

    #[test]
    fn test_compile_only_words_interpreted() {
        let mut xs = boot();
        xs.capture_output();
        assert_eq!(Err(Qerr::CompileOnly), xs.interpret("1 IF"));
        xs.take_output();
        assert_eq!(Err(Qerr::CompileOnly), xs.interpret("EXIT"));
        xs.take_output();
    }

    #[test]
    fn test_multiline_definition() {
        let mut xs = boot();
        xs.interpret(": F 1").unwrap();
        assert!(xs.is_compiling());
        xs.interpret("2 + ;").unwrap();
        assert!(!xs.is_compiling());
        xs.interpret("F").unwrap();
        assert_eq!(3, pop(&mut xs));
    }

    #[test]
    fn test_shadowing_and_no_self_reference() {
        let mut xs = boot();
        xs.interpret(": X 1 ;").unwrap();
        // the X inside refers to the previous definition
        xs.interpret(": X X 2 + ; X").unwrap();
        assert_eq!(3, pop(&mut xs));
        // an unknown name inside a definition aborts the definition
        assert_eq!(Err(Qerr::Undefined), {
            xs.capture_output();
            let r = xs.interpret(": Y Y ;");
            xs.take_output();
            r
        });
    }

    #[test]
    fn test_recurse() {
        let mut xs = boot();
        xs.interpret(": FACT DUP 1 > IF DUP 1- RECURSE * THEN ; 5 FACT").unwrap();
        assert_eq!(120, pop(&mut xs));
    }

    #[test]
    fn test_tick_execute_noname() {
        let mut xs = boot();
        xs.interpret("5 ' DUP EXECUTE").unwrap();
        assert_eq!(5, pop(&mut xs));
        assert_eq!(5, pop(&mut xs));
        xs.interpret(":NONAME 42 ; EXECUTE").unwrap();
        assert_eq!(42, pop(&mut xs));
        xs.capture_output();
        assert_eq!(Err(Qerr::Undefined), xs.interpret("' NOPE"));
        let report = xs.take_output();
        assert!(report.contains("\"NOPE\" "), "{}", report);
        assert!(report.contains(">> "), "{}", report);
    }

    #[test]
    fn test_immediate_and_postpone() {
        let mut xs = boot();
        xs.interpret(": FOO 42 ; IMMEDIATE").unwrap();
        xs.interpret(": BAR FOO ;").unwrap();
        // FOO ran at compile time
        assert_eq!(42, pop(&mut xs));
        xs.interpret("BAR").unwrap();
        assert_eq!(0, xs.data_depth());
        xs.interpret("' FOO immediate? ' BAR immediate?").unwrap();
        assert_eq!(0, pop(&mut xs));
        assert_eq!(-1, pop(&mut xs));
        xs.interpret(": P POSTPONE DUP ; IMMEDIATE : Q P ; 5 Q").unwrap();
        assert_eq!(5, pop(&mut xs));
        assert_eq!(5, pop(&mut xs));
    }

    #[test]
    fn test_literal_and_bracket_words() {
        let mut xs = boot();
        xs.interpret(": L [ 3 4 + ] LITERAL ; L").unwrap();
        assert_eq!(7, pop(&mut xs));
        xs.interpret(": C [CHAR] A ; C").unwrap();
        assert_eq!(65, pop(&mut xs));
        xs.interpret("CHAR B").unwrap();
        assert_eq!(66, pop(&mut xs));
        xs.interpret(": TICKED ['] DUP ; TICKED 9 SWAP EXECUTE").unwrap();
        assert_eq!(9, pop(&mut xs));
        assert_eq!(9, pop(&mut xs));
    }

    #[test]
    fn test_char_literals() {
        let mut xs = boot();
        xs.interpret("'A' '\\n'").unwrap();
        assert_eq!(10, pop(&mut xs));
        assert_eq!(65, pop(&mut xs));
    }

    #[test]
    fn test_float_literals() {
        let mut xs = boot();
        xs.interpret("1.5").unwrap();
        assert_eq!(1.5, xs.pop_float().unwrap());
        assert_eq!(0, xs.data_depth());
        xs.interpret(": P 2.5 ; P").unwrap();
        assert_eq!(2.5, xs.pop_float().unwrap());
    }

    #[test]
    fn test_strings_and_comments() {
        let mut xs = boot();
        assert_eq!("hi", output_of(&mut xs, "S\" hi\" TYPE"));
        assert_eq!("hello", output_of(&mut xs, ": G .\" hello\" ; G"));
        assert_eq!("now", output_of(&mut xs, ".( now)"));
        xs.interpret("1 ( comment words ) 3 +").unwrap();
        assert_eq!(4, pop(&mut xs));
        xs.interpret("1 2 \\ 3 4").unwrap();
        assert_eq!(2, pop(&mut xs));
        assert_eq!(1, pop(&mut xs));
        // escapes rewrite the buffer in place
        xs.interpret("S\" a\\nb\"").unwrap();
        assert_eq!(3, pop(&mut xs));
        let addr = pop(&mut xs) as usize;
        assert_eq!(b"a\nb", xs.bytes(addr, 3).unwrap());
    }

    #[test]
    fn test_memory_words() {
        let mut xs = boot();
        xs.interpret("CREATE BUF 16 ALLOT").unwrap();
        xs.interpret("HERE BUF -").unwrap();
        assert_eq!(16, pop(&mut xs));
        xs.interpret("42 BUF ! BUF @").unwrap();
        assert_eq!(42, pop(&mut xs));
        xs.interpret("7 BUF +! BUF @").unwrap();
        assert_eq!(49, pop(&mut xs));
        xs.interpret("65 BUF C! BUF C@").unwrap();
        assert_eq!(65, pop(&mut xs));
        xs.interpret("BUF BUF 8 + 4 MOVE BUF 8 + C@").unwrap();
        assert_eq!(65, pop(&mut xs));
        xs.interpret("BUF 16 32 FILL BUF C@").unwrap();
        assert_eq!(32, pop(&mut xs));
        xs.interpret("3 CELLS 2 CELL+ 1 CHARS 0 CHAR+").unwrap();
        assert_eq!(1, pop(&mut xs));
        assert_eq!(1, pop(&mut xs));
        assert_eq!(10, pop(&mut xs));
        assert_eq!(24, pop(&mut xs));
        xs.interpret("7 ALIGNED").unwrap();
        assert_eq!(8, pop(&mut xs));
    }

    #[test]
    fn test_comma_compiles_cells() {
        let mut xs = boot();
        xs.interpret("CREATE NUMS 1 , 2 , 3 ,").unwrap();
        xs.interpret("NUMS @ NUMS CELL+ @ NUMS 2 CELLS + @").unwrap();
        assert_eq!(3, pop(&mut xs));
        assert_eq!(2, pop(&mut xs));
        assert_eq!(1, pop(&mut xs));
    }

    #[test]
    fn test_allot_bounds() {
        let mut xs = boot();
        // releasing below the newest word's data base
        assert_eq!(Err(Qerr::Resize), xs.interpret("-64 ALLOT"));
        xs.interpret("16 ALLOT -16 ALLOT").unwrap();
        // more than the data space holds
        assert_eq!(Err(Qerr::Allocate), xs.interpret("1000000000 ALLOT"));
        xs.interpret("UNUSED").unwrap();
        let unused = pop(&mut xs) as usize;
        assert!(unused < xs.mem.len());
    }

    #[test]
    fn test_allocate_free_resize() {
        let mut xs = boot();
        xs.interpret("100 ALLOCATE").unwrap();
        assert_eq!(0, pop(&mut xs));
        let addr = pop(&mut xs) as usize;
        assert!(xs.here < addr && addr + 100 <= xs.mem.len());
        xs.interpret(&format!("7 {} ! {} 200 RESIZE", addr, addr)).unwrap();
        assert_eq!(0, pop(&mut xs));
        let addr2 = pop(&mut xs) as usize;
        assert_eq!(7, xs.fetch_cell(addr2).unwrap().int());
        xs.interpret(&format!("{} FREE", addr2)).unwrap();
        assert_eq!(0, pop(&mut xs));
        // MARKER does not reclaim heap blocks
        let heap = xs.heap;
        xs.interpret("MARKER M 1 ALLOT M").unwrap();
        assert_eq!(heap, xs.heap);
    }

    #[test]
    fn test_marker_restores_exactly() {
        let mut xs = boot();
        let words = xs.dict.len();
        let here = xs.here;
        xs.interpret("MARKER M : A 1 ; : B 2 ; CREATE C 64 ALLOT M").unwrap();
        assert_eq!(words, xs.dict.len());
        assert_eq!(here, xs.here);
        assert!(xs.find_name(b"A").is_none());
    }

    #[test]
    fn test_throw_catch() {
        let mut xs = boot();
        xs.interpret("0 THROW 1").unwrap();
        assert_eq!(1, pop(&mut xs));
        assert_eq!(Err(Qerr::Undefined), xs.interpret("-13 THROW"));
        assert_eq!(Err(Qerr::Throw(-100)), xs.interpret("-100 THROW"));
        // catch of a failing word restores depth and yields the code
        xs.interpret("' DUP CATCH").unwrap();
        assert_eq!(Qerr::StackUnderflow.code(), pop(&mut xs));
        assert_eq!(0, xs.data_depth());
        // catch of a passing word yields zero
        xs.interpret("5 ' DUP CATCH").unwrap();
        assert_eq!(0, pop(&mut xs));
        assert_eq!(5, pop(&mut xs));
        assert_eq!(5, pop(&mut xs));
    }

    #[test]
    fn test_abort_quote() {
        let mut xs = boot();
        xs.interpret(": CHECK ABORT\" boom\" ;").unwrap();
        xs.interpret("0 CHECK 7").unwrap();
        assert_eq!(7, pop(&mut xs));
        xs.capture_output();
        assert_eq!(Err(Qerr::AbortQuote), xs.interpret("1 CHECK"));
        assert_eq!("boom", xs.take_output());
    }

    #[test]
    fn test_exception_recovery_classes() {
        let mut xs = boot();
        // abort class empties the data stack
        xs.interpret("1 2").unwrap();
        let e = xs.interpret("ABORT").unwrap_err();
        xs.capture_output();
        xs.exception(e);
        assert_eq!("", xs.take_output());
        assert_eq!(0, xs.data_depth());
        // quit retains the data stack
        xs.interpret("1 2").unwrap();
        let e = xs.interpret("QUIT").unwrap_err();
        xs.exception(e);
        assert_eq!(2, xs.data_depth());
        xs.ds.reset();
        // an aborted compilation is discarded
        let words = xs.dict.len();
        let here = xs.here;
        xs.capture_output();
        let e = xs.interpret(": OOPS 1 2 NOPE").unwrap_err();
        assert_eq!(Qerr::Undefined, e);
        xs.exception(e);
        let report = xs.take_output();
        assert!(report.contains("-13 thrown: undefined word"), "{}", report);
        assert!(report.contains("while compiling \"OOPS\""), "{}", report);
        assert_eq!(words, xs.dict.len());
        assert_eq!(here, xs.here);
        assert!(!xs.is_compiling());
        assert!(xs.find_name(b"OOPS").is_none());
    }

    #[test]
    fn test_evaluate() {
        let mut xs = boot();
        xs.interpret("S\" 1 2 +\" EVALUATE").unwrap();
        assert_eq!(3, pop(&mut xs));
        // a throw inside EVALUATE unwinds the source stack
        xs.capture_output();
        assert_eq!(Err(Qerr::Undefined), xs.interpret("S\" NOPE\" EVALUATE"));
        xs.take_output();
        assert_eq!(0, xs.sources.len());
        // EVALUATE may compile into an open definition
        xs.interpret(": E S\" 40 2 +\" EVALUATE ; E").unwrap();
        assert_eq!(42, pop(&mut xs));
    }

    #[test]
    fn test_source_and_parse_words() {
        let mut xs = boot();
        xs.interpret("SOURCE").unwrap();
        let len = pop(&mut xs) as usize;
        let addr = pop(&mut xs) as usize;
        assert_eq!(b"SOURCE", xs.bytes(addr, len).unwrap());
        xs.interpret("PARSE-NAME hello").unwrap();
        let len = pop(&mut xs) as usize;
        let addr = pop(&mut xs) as usize;
        assert_eq!(5, len);
        assert_eq!(b"hello", xs.bytes(addr, len).unwrap());
        xs.interpret("CHAR ) PARSE abc) 9").unwrap();
        assert_eq!(9, pop(&mut xs));
        let len = pop(&mut xs) as usize;
        let addr = pop(&mut xs) as usize;
        assert_eq!(b"abc", xs.bytes(addr, len).unwrap());
        xs.interpret("SOURCE-ID").unwrap();
        assert_eq!(0, pop(&mut xs));
        xs.interpret("BL").unwrap();
        assert_eq!(32, pop(&mut xs));
    }

    #[test]
    fn test_find_name_word() {
        let mut xs = boot();
        xs.interpret("S\" dup\" FIND-NAME").unwrap();
        let xt = xs.pop_data().unwrap().xt().unwrap();
        assert_eq!("DUP", xs.word(xt).unwrap().name);
        xs.interpret("S\" no-such-word\" FIND-NAME").unwrap();
        assert_eq!(0, pop(&mut xs));
    }

    #[test]
    fn test_state_base_cells() {
        let mut xs = boot();
        xs.interpret("STATE @").unwrap();
        assert_eq!(STATE_INTERPRET, pop(&mut xs));
        xs.interpret("BASE @").unwrap();
        assert_eq!(10, pop(&mut xs));
        xs.interpret("HEX BASE @ DECIMAL").unwrap();
        assert_eq!(16, pop(&mut xs));
        xs.interpret("2 BASE ! 101 DECIMAL").unwrap();
        assert_eq!(5, pop(&mut xs));
    }

    #[test]
    fn test_number_output_roundtrip() {
        let mut xs = boot();
        assert_eq!("-377 ", output_of(&mut xs, "-377 ."));
        assert_eq!("FF ", output_of(&mut xs, "255 HEX . DECIMAL"));
        assert_eq!("18446744073709551615 ", output_of(&mut xs, "-1 U."));
        assert_eq!("<2> 1 2 ", output_of(&mut xs, "1 2 .S"));
        xs.ds.reset();
    }

    #[test]
    fn test_body_not_created() {
        let mut xs = boot();
        xs.interpret("CREATE PT 1 , ' PT >BODY @").unwrap();
        assert_eq!(1, pop(&mut xs));
        assert_eq!(Err(Qerr::NotCreated), xs.interpret("' DUP >BODY"));
        assert_eq!(Err(Qerr::NotCreated), xs.interpret(": D DOES> ; D"));
    }

    #[test]
    fn test_include_missing_file() {
        let mut xs = boot();
        assert_eq!(Err(Qerr::NoSuchFile), xs.include("no-such-file.q4"));
    }

    #[test]
    fn test_eval_file() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.q4");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "1 2 +").unwrap();
        writeln!(f, ": TRIPLE 3 * ;").unwrap();
        writeln!(f, "TRIPLE").unwrap();
        drop(f);
        let mut xs = boot();
        xs.eval_file(path.to_str().unwrap()).unwrap();
        assert_eq!(9, pop(&mut xs));
        assert_eq!(0, xs.sources.len());
    }

    #[test]
    fn test_words_listing() {
        let mut xs = boot();
        let listing = output_of(&mut xs, "WORDS");
        assert!(listing.contains("DUP"), "{}", listing);
        assert!(listing.contains("CREATE"), "{}", listing);
        // hidden words stay hidden
        assert!(!listing.contains("_repl"), "{}", listing);
    }

    #[test]
    fn test_boot_input_is_terminal() {
        let xs = boot();
        assert!(xs.input.is_terminal());
        assert_eq!(0, xs.input.source_id());
        assert_eq!(0, xs.sources.len());
    }

    #[test]
    fn test_dictionary_invariants() {
        let mut xs = boot();
        xs.interpret(": A 1 ; : B 2 ; CREATE C").unwrap();
        // newest first, data pointers cell aligned
        for w in &xs.dict {
            assert_eq!(0, w.addr % CELL, "{}", w.name);
        }
        assert!(xs.here <= xs.heap);
        assert!(DATA_ORIGIN <= xs.here);
    }

    #[test]
    fn test_argv() {
        let opts = Options {
            argv: vec!["alpha".to_string(), "beta".to_string()],
            ..Options::default()
        };
        let mut xs = Machine::new(opts).unwrap();
        xs.interpret("argc").unwrap();
        assert_eq!(2, pop(&mut xs));
        xs.interpret("1 arg").unwrap();
        let len = pop(&mut xs) as usize;
        let addr = pop(&mut xs) as usize;
        assert_eq!(b"beta", xs.bytes(addr, len).unwrap());
        assert_eq!(Err(Qerr::ResultOutOfRange), xs.interpret("5 arg"));
    }
}
