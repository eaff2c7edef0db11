//! Data-group traversal over the secure channel.
//!
//! Files are read in fixed order: EF.COM, DG1, DG2. Each read starts with a
//! four-byte header to learn the outer BER-TLV length, then pages through the
//! file with protected READ BINARY commands. DG1 is decoded into its MRZ
//! fields; the DG2 face image is streamed to a byte sink from the JPEG (or
//! JPEG 2000) marker onward.

use crate::{
    error::Error,
    iso7816::parse_ber_length,
    secure::SecureChannel,
    transceiver::Transceiver,
};
use log::{debug, warn};
use std::io::Write;

/// Elementary files of the LDS1 application read by this crate.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum FileId {
    /// Common data: LDS/Unicode versions and the data-group tag list.
    EfCom = 0x011E,
    /// Machine-readable-zone mirror.
    Dg1 = 0x0101,
    /// Encoded face biometric.
    Dg2 = 0x0102,
}

/// Bytes requested per protected READ BINARY.
pub const CHUNK_SIZE: usize = 256;

/// Initial read: enough for the outer tag and a long-form length field.
const HEADER_LEN: usize = 4;

/// READ BINARY offsets are 15-bit; P1's top bit selects short-EF addressing.
const MAX_OFFSET: usize = 0x7FFF;

/// JPEG (JFIF) start-of-image marker.
const JPEG_MAGIC: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xE0];
/// JPEG 2000 signature-box prefix.
const JP2_MAGIC: [u8; 6] = [0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50];

/// Select an elementary file under secure messaging.
pub fn select_file<T: Transceiver>(
    card: &mut T,
    sm: &mut SecureChannel,
    fid: FileId,
) -> Result<(), Error> {
    let apdu = sm.wrap_select(fid as u16)?;
    let (response, status) = card.transmit(&apdu)?;
    if !status.is_success() {
        return Err(Error::CardStatus(status));
    }
    let (_, sw) = sm.unwrap_response(&response, 0)?;
    if !sw.is_success() {
        return Err(Error::CardStatus(sw));
    }
    debug!("selected file {fid:?}");
    Ok(())
}

/// One protected READ BINARY of up to `le` bytes at `offset`.
///
/// An empty payload or an end-of-file status marks the end of the file; a
/// short payload with success status is returned as-is.
pub fn read_binary<T: Transceiver>(
    card: &mut T,
    sm: &mut SecureChannel,
    offset: u16,
    le: usize,
) -> Result<Vec<u8>, Error> {
    let apdu = sm.wrap_read_binary(offset, le)?;
    let (response, status) = card.transmit(&apdu)?;
    if !status.is_success() {
        return Err(Error::CardStatus(status));
    }
    let (payload, sw) = sm.unwrap_response(&response, le)?;
    if !sw.is_success() && !sw.is_end_of_file() {
        return Err(Error::CardStatus(sw));
    }
    Ok(payload)
}

/// Read the file header and return the total file length (tag + length
/// field + value) together with the header bytes already consumed.
fn read_file_header<T: Transceiver>(
    card: &mut T,
    sm: &mut SecureChannel,
) -> Result<(usize, Vec<u8>), Error> {
    let header = read_binary(card, sm, 0, HEADER_LEN)?;
    if header.len() < 2 {
        return Err(Error::DataGroupParse("file header too short"));
    }
    let (len, len_bytes) =
        parse_ber_length(&header[1..]).ok_or(Error::DataGroupParse("bad outer length field"))?;
    Ok((1 + len_bytes + len, header))
}

/// Select and fully read an elementary file into memory.
pub fn read_file<T: Transceiver>(
    card: &mut T,
    sm: &mut SecureChannel,
    fid: FileId,
) -> Result<Vec<u8>, Error> {
    select_file(card, sm, fid)?;
    let (total, header) = read_file_header(card, sm)?;
    debug!("reading {fid:?}: {total} bytes");

    let mut contents = header;
    while contents.len() < total {
        if contents.len() > MAX_OFFSET {
            return Err(Error::DataGroupParse("file exceeds READ BINARY addressing"));
        }
        let le = (total - contents.len()).min(CHUNK_SIZE);
        let chunk = read_binary(card, sm, contents.len() as u16, le)?;
        if chunk.is_empty() {
            break;
        }
        contents.extend_from_slice(&chunk);
    }
    Ok(contents)
}

/// Stream the DG2 face image into `sink`.
///
/// The header and first data chunk are scanned for the image marker;
/// everything from the marker to the end of the file is written verbatim.
/// Returns whether an image was written. A DG2 without a recognizable
/// marker is drained but produces no output.
pub fn stream_face_image<T: Transceiver, W: Write>(
    card: &mut T,
    sm: &mut SecureChannel,
    sink: &mut W,
) -> Result<bool, Error> {
    select_file(card, sm, FileId::Dg2)?;
    let (total, header) = read_file_header(card, sm)?;
    debug!("reading Dg2: {total} bytes");

    let mut first = header;
    if first.len() < total {
        let le = (total - first.len()).min(CHUNK_SIZE);
        let chunk = read_binary(card, sm, first.len() as u16, le)?;
        first.extend_from_slice(&chunk);
    }

    let produced = match find_image_magic(&first) {
        Some(start) => {
            sink.write_all(&first[start..])?;
            true
        }
        None => {
            warn!(
                "no JPEG or JPEG 2000 marker in the first {} bytes of DG2",
                first.len()
            );
            false
        }
    };

    let mut consumed = first.len();
    while consumed < total {
        if consumed > MAX_OFFSET {
            return Err(Error::DataGroupParse("file exceeds READ BINARY addressing"));
        }
        let le = (total - consumed).min(CHUNK_SIZE);
        let chunk = read_binary(card, sm, consumed as u16, le)?;
        if chunk.is_empty() {
            break;
        }
        consumed += chunk.len();
        if produced {
            sink.write_all(&chunk)?;
        }
    }
    if produced {
        sink.flush()?;
    }
    Ok(produced)
}

/// Offset of the first JPEG or JPEG 2000 marker in `data`, if any.
fn find_image_magic(data: &[u8]) -> Option<usize> {
    data.windows(JPEG_MAGIC.len())
        .position(|w| w == JPEG_MAGIC)
        .into_iter()
        .chain(data.windows(JP2_MAGIC.len()).position(|w| w == JP2_MAGIC))
        .min()
}

/// Common-data file contents.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EfCom {
    pub lds_version: String,
    pub unicode_version: String,
    /// Data-group tags present on the chip (e.g. `61` for DG1, `75` for DG2).
    pub data_groups: Vec<u8>,
}

/// Decoded MRZ fields from DG1.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Dg1Fields {
    pub document_code: String,
    pub issuing_state: String,
    pub document_number: String,
    pub date_of_birth: String,
    pub sex: String,
    pub date_of_expiry: String,
    pub nationality: String,
    pub name: String,
}

/// Parse EF.COM: tag `60` wrapping `5F01`, `5F36` and `5C` children.
pub fn parse_ef_com(contents: &[u8]) -> Result<EfCom, Error> {
    let (tag, mut body, _) = take_tlv(contents)?;
    if tag != 0x60 {
        return Err(Error::DataGroupParse("EF.COM outer tag is not 60"));
    }

    let mut com = EfCom::default();
    while !body.is_empty() {
        let (tag, value, rest) = take_tlv(body)?;
        match tag {
            0x5F01 => com.lds_version = mrz_str(value)?,
            0x5F36 => com.unicode_version = mrz_str(value)?,
            0x5C => com.data_groups = value.to_vec(),
            _ => debug!("ignoring EF.COM data object {tag:04X}"),
        }
        body = rest;
    }
    Ok(com)
}

/// Parse DG1: tag `61` wrapping a `5F1F` MRZ mirror, decoded by the TD1 or
/// TD3 layout selected from the document code.
pub fn parse_dg1(contents: &[u8]) -> Result<Dg1Fields, Error> {
    let (tag, body, _) = take_tlv(contents)?;
    if tag != 0x61 {
        return Err(Error::DataGroupParse("DG1 outer tag is not 61"));
    }
    let (tag, mrz, _) = take_tlv(body)?;
    if tag != 0x5F1F {
        return Err(Error::DataGroupParse("DG1 is missing the MRZ data object"));
    }
    parse_mrz_mirror(mrz)
}

fn parse_mrz_mirror(mrz: &[u8]) -> Result<Dg1Fields, Error> {
    if !mrz.is_ascii() {
        return Err(Error::DataGroupParse("MRZ contains non-ASCII bytes"));
    }

    // TD3 (passports) carries two 44-character lines; TD1 (identity cards)
    // three 30-character lines. The document code's first letter picks the
    // layout; the length check guards against a mismatched mirror.
    match mrz.first() {
        Some(b'P') | Some(b'V') => {
            if mrz.len() != 88 {
                return Err(Error::DataGroupParse("TD3 MRZ is not 88 characters"));
            }
            Ok(Dg1Fields {
                document_code: field(&mrz[0..2]),
                issuing_state: field(&mrz[2..5]),
                name: name_field(&mrz[5..44]),
                document_number: field(&mrz[44..53]),
                nationality: field(&mrz[54..57]),
                date_of_birth: field(&mrz[57..63]),
                sex: field(&mrz[64..65]),
                date_of_expiry: field(&mrz[65..71]),
            })
        }
        Some(_) => {
            if mrz.len() != 90 {
                return Err(Error::DataGroupParse("TD1 MRZ is not 90 characters"));
            }
            Ok(Dg1Fields {
                document_code: field(&mrz[0..2]),
                issuing_state: field(&mrz[2..5]),
                document_number: field(&mrz[5..14]),
                date_of_birth: field(&mrz[30..36]),
                sex: field(&mrz[37..38]),
                date_of_expiry: field(&mrz[38..44]),
                nationality: field(&mrz[45..48]),
                name: name_field(&mrz[60..90]),
            })
        }
        None => Err(Error::DataGroupParse("empty MRZ")),
    }
}

/// An MRZ field with trailing filler removed.
fn field(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim_end_matches('<').to_string()
}

/// The name field: primary and secondary identifiers are separated by `<<`,
/// name parts by single fillers.
fn name_field(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches('<')
        .replace("<<", ", ")
        .replace('<', " ")
}

fn mrz_str(raw: &[u8]) -> Result<String, Error> {
    if !raw.is_ascii() {
        return Err(Error::DataGroupParse("non-ASCII text data object"));
    }
    Ok(String::from_utf8_lossy(raw).into_owned())
}

/// Split one BER-TLV data object off `input`: `(tag, value, rest)`.
///
/// Tags are one or two bytes (`5F01`-style); lengths may use the long forms.
fn take_tlv(input: &[u8]) -> Result<(u16, &[u8], &[u8]), Error> {
    let first = *input.first().ok_or(Error::DataGroupParse("missing data object"))?;
    let (tag, tag_len) = if first & 0x1F == 0x1F {
        let second = *input.get(1).ok_or(Error::DataGroupParse("truncated tag"))?;
        (u16::from_be_bytes([first, second]), 2)
    } else {
        (first as u16, 1)
    };
    let (len, len_bytes) = parse_ber_length(&input[tag_len..])
        .ok_or(Error::DataGroupParse("bad data-object length"))?;
    let value_start = tag_len + len_bytes;
    let value_end = value_start
        .checked_add(len)
        .filter(|&end| end <= input.len())
        .ok_or(Error::DataGroupParse("truncated data object"))?;
    Ok((tag, &input[value_start..value_end], &input[value_end..]))
}
