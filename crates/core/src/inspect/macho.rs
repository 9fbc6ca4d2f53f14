//! Mach-O inspection via load commands.
//!
//! Linked-library references come from the `LC_LOAD_DYLIB` family in
//! declaration order (the loader searches in that order, so order matters
//! downstream). `LC_RPATH` entries become search hints and `LC_ID_DYLIB`
//! is captured so a library's self-reference can be excluded later.

use std::fs;
use std::path::Path;

use goblin::mach::{Mach, MachO, SingleArch};

use crate::error::{Error, Result};
use crate::inspect::{BinaryInspector, Inspection};
use crate::model::BinaryFormat;

pub struct MachOInspector;

impl BinaryInspector for MachOInspector {
    fn inspect(&self, path: &Path) -> Result<Inspection> {
        let bytes = fs::read(path)?;
        let macho = parse_macho(&bytes, path)?;

        let mut references = Vec::new();
        for (idx, lib) in macho.libs.iter().enumerate() {
            // goblin seeds the import-ordinal table with a synthetic "self"
            // entry at index 0.
            if idx == 0 && *lib == "self" {
                continue;
            }
            references.push((*lib).to_string());
        }

        let search_hints = macho.rpaths.iter().map(|r| (*r).to_string()).collect();

        Ok(Inspection { references, search_hints, install_name: macho.name.map(str::to_string) })
    }

    fn format(&self) -> BinaryFormat {
        BinaryFormat::MachO
    }
}

/// Parse a thin Mach-O, or pick a slice out of a fat binary (preferring the
/// first 64-bit slice).
fn parse_macho<'a>(bytes: &'a [u8], path: &Path) -> Result<MachO<'a>> {
    let parse_error = |reason: String| Error::Parse {
        path: path.to_path_buf(),
        format: BinaryFormat::MachO,
        reason,
    };

    match Mach::parse(bytes).map_err(|e| parse_error(e.to_string()))? {
        Mach::Binary(macho) => Ok(macho),
        Mach::Fat(fat) => {
            let mut fallback = None;
            for idx in 0..fat.narches {
                if let Ok(SingleArch::MachO(macho)) = fat.get(idx) {
                    if macho.is_64 {
                        return Ok(macho);
                    }
                    if fallback.is_none() {
                        fallback = Some(macho);
                    }
                }
            }
            fallback.ok_or_else(|| parse_error("fat binary contains no Mach-O slice".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LC_ID_DYLIB: u32 = 0xd;
    const LC_LOAD_DYLIB: u32 = 0xc;
    const LC_RPATH: u32 = 0x8000_001c;

    fn push_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    /// `dylib_command`: 24-byte fixed part, then the name, padded to 8 bytes.
    fn dylib_command(cmd: u32, name: &str) -> Vec<u8> {
        let mut payload = name.as_bytes().to_vec();
        payload.push(0);
        while (24 + payload.len()) % 8 != 0 {
            payload.push(0);
        }
        let mut buf = Vec::new();
        push_u32(&mut buf, cmd);
        push_u32(&mut buf, (24 + payload.len()) as u32);
        push_u32(&mut buf, 24); // lc_str offset
        push_u32(&mut buf, 2); // timestamp
        push_u32(&mut buf, 0x0001_0000); // current_version
        push_u32(&mut buf, 0x0001_0000); // compatibility_version
        buf.extend_from_slice(&payload);
        buf
    }

    /// `rpath_command`: 12-byte fixed part, then the path, padded to 8 bytes.
    fn rpath_command(path: &str) -> Vec<u8> {
        let mut payload = path.as_bytes().to_vec();
        payload.push(0);
        while (12 + payload.len()) % 8 != 0 {
            payload.push(0);
        }
        let mut buf = Vec::new();
        push_u32(&mut buf, LC_RPATH);
        push_u32(&mut buf, (12 + payload.len()) as u32);
        push_u32(&mut buf, 12); // lc_str offset
        buf.extend_from_slice(&payload);
        buf
    }

    /// Minimal 64-bit x86_64 MH_DYLIB with the given load commands.
    fn macho_dylib(commands: &[Vec<u8>]) -> Vec<u8> {
        let sizeofcmds: usize = commands.iter().map(Vec::len).sum();
        let mut buf = Vec::new();
        push_u32(&mut buf, 0xfeed_facf); // MH_MAGIC_64
        push_u32(&mut buf, 0x0100_0007); // CPU_TYPE_X86_64
        push_u32(&mut buf, 3); // CPU_SUBTYPE_X86_64_ALL
        push_u32(&mut buf, 6); // MH_DYLIB
        push_u32(&mut buf, commands.len() as u32);
        push_u32(&mut buf, sizeofcmds as u32);
        push_u32(&mut buf, 0); // flags
        push_u32(&mut buf, 0); // reserved
        for cmd in commands {
            buf.extend_from_slice(cmd);
        }
        buf
    }

    #[test]
    fn reads_load_dylibs_rpaths_and_install_name() {
        let bytes = macho_dylib(&[
            dylib_command(LC_ID_DYLIB, "@rpath/libself.dylib"),
            dylib_command(LC_LOAD_DYLIB, "/usr/lib/libSystem.B.dylib"),
            dylib_command(LC_LOAD_DYLIB, "@rpath/libdep.dylib"),
            rpath_command("@loader_path/../Frameworks"),
        ]);
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("libself.dylib");
        fs::write(&path, bytes).unwrap();

        let inspection = MachOInspector.inspect(&path).unwrap();
        assert_eq!(
            inspection.references,
            vec!["/usr/lib/libSystem.B.dylib".to_string(), "@rpath/libdep.dylib".to_string()]
        );
        assert_eq!(inspection.search_hints, vec!["@loader_path/../Frameworks".to_string()]);
        assert_eq!(inspection.install_name.as_deref(), Some("@rpath/libself.dylib"));
    }

    #[test]
    fn load_order_is_preserved() {
        let bytes = macho_dylib(&[
            dylib_command(LC_LOAD_DYLIB, "@rpath/libz.dylib"),
            dylib_command(LC_LOAD_DYLIB, "@rpath/liba.dylib"),
        ]);
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("bin");
        fs::write(&path, bytes).unwrap();

        let inspection = MachOInspector.inspect(&path).unwrap();
        assert_eq!(
            inspection.references,
            vec!["@rpath/libz.dylib".to_string(), "@rpath/liba.dylib".to_string()]
        );
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("garbage");
        fs::write(&path, b"\x00\x01\x02\x03not a mach-o").unwrap();

        let err = MachOInspector.inspect(&path).unwrap_err();
        match err {
            Error::Parse { format, .. } => assert_eq!(format, BinaryFormat::MachO),
            other => panic!("expected parse error, got {other}"),
        }
    }
}
