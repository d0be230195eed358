// src/pipeline/archive.rs

//! Archive extraction.
//!
//! Every portal archive carries one CSV member. Older extracts are
//! EUC-KR encoded, newer ones UTF-8 with or without a BOM; the member is
//! written out as plain UTF-8 either way.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use encoding_rs::{EUC_KR, Encoding, UTF_8};
use tracing::{debug, info};
use zip::ZipArchive;

use crate::error::{AppError, Result};

const CHUNK: usize = 64 * 1024;

/// Extract the archive's CSV member into `dest_dir` as `{archive stem}.csv`.
///
/// With several CSV members, the one named after the archive is used.
pub fn extract_single_csv(zip_path: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let stem = zip_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| AppError::store(format!("not an archive path: {}", zip_path.display())))?;

    let mut archive = ZipArchive::new(BufReader::new(File::open(zip_path)?))?;

    let mut members = Vec::new();
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if !entry.is_dir() && entry.name().to_ascii_lowercase().ends_with(".csv") {
            members.push((i, entry.name().to_string()));
        }
    }

    let index = match members.as_slice() {
        [] => {
            return Err(AppError::store(format!(
                "{} contains no CSV member",
                zip_path.display()
            )));
        }
        [(i, _)] => *i,
        many => many
            .iter()
            .find(|(_, name)| member_stem(name) == stem)
            .map(|(i, _)| *i)
            .ok_or_else(|| {
                AppError::store(format!(
                    "{} has {} CSV members and none named {stem}.csv",
                    zip_path.display(),
                    many.len()
                ))
            })?,
    };

    let dest = dest_dir.join(format!("{stem}.csv"));
    let mut member = archive.by_index(index)?;
    let mut writer = BufWriter::new(File::create(&dest)?);
    let (encoding, bytes) = transcode_to_utf8(&mut member, &mut writer)?;
    writer.flush()?;

    info!(
        archive = %zip_path.display(),
        member = member.name(),
        encoding = encoding.name(),
        bytes,
        "Extracted CSV"
    );
    Ok(dest)
}

fn member_stem(name: &str) -> &str {
    let base = name.rsplit('/').next().unwrap_or(name);
    base.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(base)
}

/// Guess the encoding of a CSV from its first bytes.
fn detect_encoding(head: &[u8]) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(head) {
        return encoding;
    }
    match std::str::from_utf8(head) {
        Ok(_) => UTF_8,
        // a multi-byte sequence cut by the chunk boundary
        Err(e) if e.error_len().is_none() => UTF_8,
        Err(_) => EUC_KR,
    }
}

/// Stream `reader` into `writer` as UTF-8, dropping any BOM.
pub(crate) fn transcode_to_utf8<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
) -> Result<(&'static Encoding, u64)> {
    let mut buf = vec![0u8; CHUNK];
    let mut filled = read_full(reader, &mut buf)?;

    let encoding = detect_encoding(&buf[..filled]);
    debug!(encoding = encoding.name(), "Detected CSV encoding");
    let mut decoder = encoding.new_decoder_with_bom_removal();

    let mut out = String::new();
    let mut written = 0u64;
    loop {
        let last = filled == 0;
        out.clear();
        out.reserve(
            decoder
                .max_utf8_buffer_length(filled)
                .unwrap_or(filled * 3 + 16),
        );
        let _ = decoder.decode_to_string(&buf[..filled], &mut out, last);
        writer.write_all(out.as_bytes())?;
        written += out.len() as u64;

        if last {
            break;
        }
        filled = reader.read(&mut buf)?;
    }
    Ok((encoding, written))
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    pub(crate) fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, bytes) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_extracts_single_member() {
        let tmp = TempDir::new().unwrap();
        let zip_path = tmp.path().join("AL_11_D155_20230601.zip");
        write_zip(
            &zip_path,
            &[("readme.txt", b"notes"), ("data/anything.csv", "고유번호,지번\n1,1-1\n".as_bytes())],
        );

        let csv = extract_single_csv(&zip_path, tmp.path()).unwrap();
        assert_eq!(csv, tmp.path().join("AL_11_D155_20230601.csv"));
        assert_eq!(std::fs::read_to_string(csv).unwrap(), "고유번호,지번\n1,1-1\n");
    }

    #[test]
    fn test_picks_member_named_after_archive() {
        let tmp = TempDir::new().unwrap();
        let zip_path = tmp.path().join("AL_26.zip");
        write_zip(&zip_path, &[("other.csv", b"a\n1\n"), ("AL_26.csv", b"b\n2\n")]);

        let csv = extract_single_csv(&zip_path, tmp.path()).unwrap();
        assert_eq!(std::fs::read_to_string(csv).unwrap(), "b\n2\n");
    }

    #[test]
    fn test_no_csv_member_is_store_error() {
        let tmp = TempDir::new().unwrap();
        let zip_path = tmp.path().join("empty.zip");
        write_zip(&zip_path, &[("readme.txt", b"notes")]);

        assert!(matches!(
            extract_single_csv(&zip_path, tmp.path()),
            Err(AppError::Store(_))
        ));
    }

    #[test]
    fn test_transcodes_euc_kr() {
        let (encoded, _, _) = EUC_KR.encode("고유번호,법정동명\n1111,서울특별시 종로구\n");
        let mut out = Vec::new();
        let (encoding, _) = transcode_to_utf8(&mut encoded.as_ref(), &mut out).unwrap();
        assert_eq!(encoding, EUC_KR);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "고유번호,법정동명\n1111,서울특별시 종로구\n"
        );
    }

    #[test]
    fn test_strips_utf8_bom() {
        let input = "\u{feff}고유번호\n1\n".as_bytes();
        let mut out = Vec::new();
        let (encoding, _) = transcode_to_utf8(&mut &input[..], &mut out).unwrap();
        assert_eq!(encoding, UTF_8);
        assert_eq!(String::from_utf8(out).unwrap(), "고유번호\n1\n");
    }
}
