use crate::cell::*;
use crate::error::*;
use crate::machine::{Machine, BLOCK_ADDR};
use crate::word::WordFn;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::Path;

pub const BLOCK_SIZE: usize = 1024;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BlockState {
    Free,
    Clean,
    Dirty,
}

/// Single-slot write-back cache over the block file.  The 1024 bytes
/// of the buffer itself live in data space at a fixed address so BLOCK
/// can hand Forth code an ordinary address.
pub struct BlockCache {
    pub file: Option<File>,
    pub state: BlockState,
    pub number: Quint,
}

impl BlockCache {
    pub fn closed() -> BlockCache {
        BlockCache { file: None, state: BlockState::Free, number: 0 }
    }
}

fn try_open(path: &Path) -> Option<File> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)
        .ok()?;
    // the lock guards the file for the lifetime of the context
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        return None;
    }
    Some(file)
}

/// Open and lock the block file, falling back to the home directory
/// when the working directory's copy is already in use.
pub fn open_cache(path: &str) -> BlockCache {
    if let Some(file) = try_open(Path::new(path)) {
        return BlockCache { file: Some(file), state: BlockState::Free, number: 0 };
    }
    if let Ok(home) = std::env::var("HOME") {
        if let Some(file) = try_open(&Path::new(&home).join(path)) {
            return BlockCache { file: Some(file), state: BlockState::Free, number: 0 };
        }
    }
    eprintln!("{}: already in use", path);
    BlockCache::closed()
}

/// Extend the file with space-filled blocks until `number` exists,
/// leaving the cursor at the start of that block.
fn block_grow(file: &mut File, number: Quint) -> std::io::Result<()> {
    let len = file.metadata()?.len();
    let want = number * BLOCK_SIZE as u64;
    if len < want {
        file.seek(SeekFrom::End(0))?;
        let blanks = vec![b' '; (want - len) as usize];
        file.write_all(&blanks)?;
    }
    file.seek(SeekFrom::Start((number - 1) * BLOCK_SIZE as u64))?;
    Ok(())
}

fn block_read(xs: &mut Machine, number: Quint) -> Qresult {
    let mut buf = [0u8; BLOCK_SIZE];
    {
        let file = xs.block.file.as_mut().ok_or(Qerr::IoError)?;
        block_grow(file, number).map_err(|_| Qerr::BlockRead)?;
        file.read_exact(&mut buf).map_err(|_| Qerr::BlockRead)?;
    }
    xs.bytes_mut(BLOCK_ADDR, BLOCK_SIZE)?.copy_from_slice(&buf);
    OK
}

fn block_write(xs: &mut Machine) -> Qresult {
    let number = xs.block.number;
    if number == 0 {
        return Err(Qerr::BlockBad);
    }
    let mut buf = [0u8; BLOCK_SIZE];
    buf.copy_from_slice(xs.bytes(BLOCK_ADDR, BLOCK_SIZE)?);
    let file = xs.block.file.as_mut().ok_or(Qerr::IoError)?;
    block_grow(file, number).map_err(|_| Qerr::BlockWrite)?;
    file.write_all(&buf).map_err(|_| Qerr::BlockWrite)?;
    xs.block.state = BlockState::Clean;
    OK
}

/// Make `number` the cached block, writing back a dirty buffer before
/// switching and optionally reading the new block in.
pub fn block_buffer(xs: &mut Machine, number: Quint, with_read: bool) -> Qresult {
    if xs.block.file.is_none() {
        return Err(Qerr::IoError);
    }
    if number == 0 {
        return Err(Qerr::BlockBad);
    }
    if number == xs.block.number {
        return OK;
    }
    if xs.block.state == BlockState::Dirty {
        block_write(xs)?;
    }
    if with_read {
        block_read(xs, number)?;
    }
    xs.block.state = BlockState::Clean;
    xs.block.number = number;
    OK
}

// ( u -- aaddr )
fn core_word_block(xs: &mut Machine) -> Qresult {
    let number = xs.ds.pop()?.uint();
    block_buffer(xs, number, true)?;
    xs.ds.push(Cell::from_addr(BLOCK_ADDR))
}

// ( u -- aaddr )  Like BLOCK but the contents are not read.
fn core_word_buffer(xs: &mut Machine) -> Qresult {
    let number = xs.ds.pop()?.uint();
    block_buffer(xs, number, false)?;
    xs.ds.push(Cell::from_addr(BLOCK_ADDR))
}

fn core_word_update(xs: &mut Machine) -> Qresult {
    xs.block.state = BlockState::Dirty;
    OK
}

fn core_word_save_buffers(xs: &mut Machine) -> Qresult {
    if xs.block.state == BlockState::Dirty {
        block_write(xs)?;
    }
    OK
}

fn core_word_empty_buffers(xs: &mut Machine) -> Qresult {
    xs.block.state = BlockState::Free;
    OK
}

// ( -- u )  Number of blocks in the file.
fn core_word_blocks(xs: &mut Machine) -> Qresult {
    let len = {
        let file = xs.block.file.as_ref().ok_or(Qerr::IoError)?;
        file.metadata().map_err(|_| Qerr::IoError)?.len()
    };
    xs.ds.push(Cell::from_uint(len / BLOCK_SIZE as u64))
}

// ( u -- )
fn core_word_load(xs: &mut Machine) -> Qresult {
    let number = xs.ds.pop()?.uint();
    xs.load_block(number)
}

pub fn block_load(xs: &mut Machine) -> Qresult {
    struct Def(&'static str, WordFn);
    for Def(name, xf) in [
        Def("BLOCK", core_word_block),
        Def("BUFFER", core_word_buffer),
        Def("UPDATE", core_word_update),
        Def("SAVE-BUFFERS", core_word_save_buffers),
        Def("EMPTY-BUFFERS", core_word_empty_buffers),
        Def("blocks", core_word_blocks),
        Def("LOAD", core_word_load),
    ] {
        xs.insert_native(name, xf, 0)?;
    }
    OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Options;

    fn boot(dir: &Path) -> Machine {
        let path = dir.join("scratch.blk");
        let opts = Options {
            block_file: Some(path.to_string_lossy().into_owned()),
            ..Options::default()
        };
        Machine::new(opts).unwrap()
    }

    #[test]
    fn test_block_read_extends() {
        let dir = tempfile::tempdir().unwrap();
        let mut xs = boot(dir.path());
        xs.interpret("1 BLOCK C@").unwrap();
        assert_eq!(b' ' as i64, xs.pop_data().unwrap().int());
        xs.interpret("3 BLOCK DROP blocks").unwrap();
        assert_eq!(3, xs.pop_data().unwrap().int());
    }

    #[test]
    fn test_write_back_on_switch() {
        let dir = tempfile::tempdir().unwrap();
        let mut xs = boot(dir.path());
        xs.interpret("65 1 BLOCK C! UPDATE").unwrap();
        // switching blocks flushes the dirty buffer
        xs.interpret("2 BLOCK DROP").unwrap();
        xs.interpret("1 BLOCK C@").unwrap();
        assert_eq!(65, xs.pop_data().unwrap().int());
    }

    #[test]
    fn test_save_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.blk");
        {
            let opts = Options {
                block_file: Some(path.to_string_lossy().into_owned()),
                ..Options::default()
            };
            let mut xs = Machine::new(opts).unwrap();
            xs.interpret("66 2 BLOCK C! UPDATE SAVE-BUFFERS").unwrap();
        }
        let data = std::fs::read(&path).unwrap();
        assert_eq!(2 * BLOCK_SIZE, data.len());
        assert_eq!(b'B', data[BLOCK_SIZE]);
        assert!(data[..BLOCK_SIZE].iter().all(|&b| b == b' '));
    }

    #[test]
    fn test_load_block() {
        let dir = tempfile::tempdir().unwrap();
        let mut xs = boot(dir.path());
        xs.interpret("1 BUFFER DROP").unwrap();
        let text = b"3 4 + ";
        xs.bytes_mut(BLOCK_ADDR, BLOCK_SIZE).unwrap().fill(b' ');
        xs.bytes_mut(BLOCK_ADDR, text.len()).unwrap().copy_from_slice(text);
        xs.interpret("1 LOAD").unwrap();
        assert_eq!(7, xs.pop_data().unwrap().int());
    }

    #[test]
    fn test_no_block_file() {
        let mut xs = Machine::new(Options::default()).unwrap();
        assert_eq!(Err(Qerr::IoError), xs.interpret("1 BLOCK"));
        assert_eq!(Err(Qerr::BlockBad), {
            let mut xs2 = {
                let dir = tempfile::tempdir().unwrap();
                boot(dir.path())
            };
            xs2.interpret("0 BLOCK")
        });
    }
}
