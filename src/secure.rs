//! Secure Messaging: protected APDU construction and response verification.
//!
//! After BAC succeeds, every command travels as CLA `0C` with the payload
//! wrapped in a DO'87' cryptogram (or a DO'97' expected length) and an eight
//! byte DO'8E' MAC computed over the send sequence counter, the masked
//! header and the data objects. Responses are verified the same way before
//! anything is decrypted.

use crate::{
    error::Error,
    iso7816::{
        parse_ber_length, StatusWord, CLA_PROTECTED, INS_READ_BINARY, INS_SELECT, TAG_DO87,
        TAG_DO8E, TAG_DO97, TAG_DO99,
    },
    tdes,
};
use subtle::ConstantTimeEq;

/// Session state established by EXTERNAL AUTHENTICATE.
///
/// The channel is the sole mutator of the send sequence counter: it steps it
/// once while building each command and once while verifying each response,
/// so a full round trip always raises it by exactly two.
pub struct SecureChannel {
    ks_enc: tdes::Key,
    ks_mac: tdes::Key,
    ssc: u64,
}

impl SecureChannel {
    pub fn new(ks_enc: tdes::Key, ks_mac: tdes::Key, ssc: u64) -> Self {
        Self { ks_enc, ks_mac, ssc }
    }

    /// Current send sequence counter value.
    pub fn ssc(&self) -> u64 {
        self.ssc
    }

    /// Wrap `SELECT <fid>` (select elementary file by identifier) into a
    /// 27-byte protected APDU.
    pub fn wrap_select(&mut self, fid: u16) -> Result<Vec<u8>, Error> {
        let header = [CLA_PROTECTED, INS_SELECT, 0x02, 0x0C];

        let mut cryptogram = fid.to_be_bytes().to_vec();
        tdes::pad2(&mut cryptogram);
        tdes::enc_3des(&self.ks_enc, &mut cryptogram);

        let mut do87 = vec![TAG_DO87, (cryptogram.len() + 1) as u8, 0x01];
        do87.extend_from_slice(&cryptogram);

        let cc = self.command_mac(&header, &do87)?;

        let mut apdu = header.to_vec();
        apdu.push((do87.len() + 10) as u8);
        apdu.extend_from_slice(&do87);
        apdu.push(TAG_DO8E);
        apdu.push(8);
        apdu.extend_from_slice(&cc);
        apdu.push(0x00);
        Ok(apdu)
    }

    /// Wrap `READ BINARY <offset>, <le>` into a 19-byte protected APDU.
    ///
    /// `le` ranges from 1 to 256; 256 is encoded as `00` per the short-form
    /// convention.
    pub fn wrap_read_binary(&mut self, offset: u16, le: usize) -> Result<Vec<u8>, Error> {
        debug_assert!((1..=256).contains(&le));
        let [p1, p2] = offset.to_be_bytes();
        let header = [CLA_PROTECTED, INS_READ_BINARY, p1, p2];
        let do97 = [TAG_DO97, 0x01, le as u8];

        let cc = self.command_mac(&header, &do97)?;

        let mut apdu = header.to_vec();
        apdu.push(0x0D);
        apdu.extend_from_slice(&do97);
        apdu.push(TAG_DO8E);
        apdu.push(8);
        apdu.extend_from_slice(&cc);
        apdu.push(0x00);
        Ok(apdu)
    }

    /// Verify a protected response and decrypt its payload.
    ///
    /// `expected_len` bounds the plaintext after padding is stripped; the
    /// wrapped status word from DO'99' is returned alongside the payload. A
    /// response without DO'87' yields an empty payload (end of file for
    /// READ BINARY).
    pub fn unwrap_response(
        &mut self,
        response: &[u8],
        expected_len: usize,
    ) -> Result<(Vec<u8>, StatusWord), Error> {
        let (do87, do99, mac) = split_response(response)?;

        let ssc = self.step_ssc()?;
        let mut k = ssc.to_vec();
        if let Some(do87) = do87 {
            k.extend_from_slice(do87);
        }
        k.extend_from_slice(do99);
        let cc = tdes::mac_3des(&self.ks_mac, &k);
        if cc[..].ct_eq(mac).unwrap_u8() != 1 {
            return Err(Error::SecureMessaging("response MAC mismatch"));
        }

        let sw = StatusWord::new(do99[2], do99[3]);

        let payload = match do87 {
            None => Vec::new(),
            Some(tlv) => {
                // Tag and length are already validated by the splitter.
                let (_, len_bytes) = parse_ber_length(&tlv[1..])
                    .ok_or(Error::SecureMessaging("truncated cryptogram length"))?;
                let body = &tlv[1 + len_bytes..];
                if body.first() != Some(&0x01) {
                    return Err(Error::SecureMessaging("unsupported padding indicator"));
                }
                let mut plain = body[1..].to_vec();
                if plain.is_empty() || plain.len() % tdes::BLOCK_SIZE != 0 {
                    return Err(Error::SecureMessaging("cryptogram not block aligned"));
                }
                tdes::dec_3des(&self.ks_enc, &mut plain);
                strip_pad2(&mut plain)?;
                if plain.len() > expected_len {
                    return Err(Error::SecureMessaging("payload longer than requested"));
                }
                plain
            }
        };
        Ok((payload, sw))
    }

    /// MAC over `SSC || padded header || data objects`, stepping the SSC.
    fn command_mac(&mut self, header: &[u8; 4], data_objects: &[u8]) -> Result<[u8; 8], Error> {
        let ssc = self.step_ssc()?;
        let mut n = ssc.to_vec();
        n.extend_from_slice(header);
        n.extend_from_slice(&[0x80, 0x00, 0x00, 0x00]);
        n.extend_from_slice(data_objects);
        Ok(tdes::mac_3des(&self.ks_mac, &n))
    }

    fn step_ssc(&mut self) -> Result<[u8; 8], Error> {
        self.ssc = self
            .ssc
            .checked_add(1)
            .ok_or(Error::SecureMessaging("send sequence counter overflow"))?;
        Ok(self.ssc.to_be_bytes())
    }
}

/// Walk the response data objects: optional DO'87', then DO'99', then DO'8E'.
///
/// Returns the raw DO'87' TLV (if present), the raw four-byte DO'99' TLV and
/// the eight-byte MAC from DO'8E'.
#[allow(clippy::type_complexity)]
fn split_response(response: &[u8]) -> Result<(Option<&[u8]>, &[u8], &[u8]), Error> {
    let mut do87 = None;
    let mut do99 = None;
    let mut mac = None;

    let mut rest = response;
    while !rest.is_empty() {
        let tag = rest[0];
        let (len, len_bytes) =
            parse_ber_length(&rest[1..]).ok_or(Error::SecureMessaging("bad data-object length"))?;
        let total = 1 + len_bytes + len;
        if rest.len() < total {
            return Err(Error::SecureMessaging("truncated data object"));
        }
        let (tlv, tail) = rest.split_at(total);
        match tag {
            TAG_DO87 if do87.is_none() && do99.is_none() && mac.is_none() => do87 = Some(tlv),
            TAG_DO99 if do99.is_none() && mac.is_none() && len == 2 => do99 = Some(tlv),
            TAG_DO8E if mac.is_none() && len == 8 => mac = Some(&tlv[2..]),
            _ => return Err(Error::SecureMessaging("unexpected data object")),
        }
        rest = tail;
    }

    let do99 = do99.ok_or(Error::SecureMessaging("missing status data object"))?;
    let mac = mac.ok_or(Error::SecureMessaging("missing response MAC"))?;
    Ok((do87, do99, mac))
}

/// Remove padding method 2 from a decrypted block sequence.
///
/// Padding occupies at most one block, so at most eight bytes are inspected.
fn strip_pad2(data: &mut Vec<u8>) -> Result<(), Error> {
    for _ in 0..tdes::BLOCK_SIZE {
        match data.pop() {
            Some(0x00) => continue,
            Some(0x80) => return Ok(()),
            _ => break,
        }
    }
    Err(Error::SecureMessaging("bad response padding"))
}
