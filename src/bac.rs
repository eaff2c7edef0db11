//! Basic Access Control: MRZ-derived keys and the mutual-authentication
//! handshake that establishes a Secure Messaging session.
//!
//! Keys are derived from the MRZ key input (document number, birth date and
//! expiry date, each with its check digit) through SHA-1, then proven to the
//! chip with GET CHALLENGE and EXTERNAL AUTHENTICATE. A successful exchange
//! yields the session keys and the initial send sequence counter.

use crate::{
    error::Error,
    iso7816::{AID_MRTD, INS_EXTERNAL_AUTHENTICATE, INS_GET_CHALLENGE, INS_SELECT},
    secure::SecureChannel,
    tdes::{self, dec_3des, enc_3des, mac_3des, set_parity_bits},
    transceiver::Transceiver,
};
use log::debug;
use rand::{CryptoRng, Rng, RngCore};
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

/// Static key pair derived from the MRZ key input.
#[derive(Clone)]
pub struct BacKeys {
    pub k_enc: tdes::Key,
    pub k_mac: tdes::Key,
}

/// First 16 bytes of SHA-1 over the MRZ key input.
pub fn seed_from_mrz(mrz: &str) -> [u8; 16] {
    let mut hasher = Sha1::new();
    hasher.update(mrz.as_bytes());
    let hash = hasher.finalize();
    hash[0..16].try_into().unwrap()
}

/// Derive the encryption and MAC keys from a 16-byte seed.
pub fn derive_keys(seed: &[u8; 16]) -> BacKeys {
    BacKeys {
        k_enc: derive_key(seed, 1),
        k_mac: derive_key(seed, 2),
    }
}

/// First 16 bytes of SHA-1(seed || counter), parity adjusted.
pub fn derive_key(seed: &[u8; 16], counter: u32) -> tdes::Key {
    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(counter.to_be_bytes());
    let hash = hasher.finalize();
    let mut key: tdes::Key = hash[0..16].try_into().unwrap();
    set_parity_bits(&mut key);
    key
}

/// Select the eMRTD application by AID.
pub fn select_application<T: Transceiver>(card: &mut T) -> Result<(), Error> {
    let mut apdu = vec![0x00, INS_SELECT, 0x04, 0x00, AID_MRTD.len() as u8];
    apdu.extend_from_slice(&AID_MRTD);
    let (_, status) = card.transmit(&apdu)?;
    if !status.is_success() {
        return Err(Error::CardStatus(status));
    }
    Ok(())
}

/// Request the chip's eight-byte nonce RND.IC.
pub fn get_challenge<T: Transceiver>(card: &mut T) -> Result<[u8; 8], Error> {
    let (data, status) = card.transmit(&[0x00, INS_GET_CHALLENGE, 0x00, 0x00, 0x08])?;
    if !status.is_success() {
        return Err(Error::CardStatus(status));
    }
    data.as_slice()
        .try_into()
        .map_err(|_| Error::Transport("unexpected GET CHALLENGE response length".into()))
}

/// Reader-side handshake state between challenge assembly and the chip's
/// reply.
pub struct AuthChallenge {
    /// E_IFD || M_IFD, the 40-byte EXTERNAL AUTHENTICATE command field.
    pub cmd_data: [u8; 40],
    rnd_ic: [u8; 8],
    rnd_ifd: [u8; 8],
    k_ifd: [u8; 16],
}

/// Assemble the EXTERNAL AUTHENTICATE command field from fixed nonces.
///
/// Split out from [`external_authenticate`] so the byte layout is a pure
/// function of its inputs.
pub fn build_authenticate_challenge(
    keys: &BacKeys,
    rnd_ic: [u8; 8],
    rnd_ifd: [u8; 8],
    k_ifd: [u8; 16],
) -> AuthChallenge {
    let mut s = [0u8; 32];
    s[..8].copy_from_slice(&rnd_ifd);
    s[8..16].copy_from_slice(&rnd_ic);
    s[16..].copy_from_slice(&k_ifd);
    enc_3des(&keys.k_enc, &mut s);
    let mac = mac_3des(&keys.k_mac, &s);

    let mut cmd_data = [0u8; 40];
    cmd_data[..32].copy_from_slice(&s);
    cmd_data[32..].copy_from_slice(&mac);
    AuthChallenge {
        cmd_data,
        rnd_ic,
        rnd_ifd,
        k_ifd,
    }
}

/// Verify the chip's EXTERNAL AUTHENTICATE reply and derive the session.
///
/// The response MAC and the returned RND.IFD are both compared in constant
/// time; any mismatch invalidates the handshake.
pub fn derive_session(
    keys: &BacKeys,
    challenge: &AuthChallenge,
    response: &[u8],
) -> Result<SecureChannel, Error> {
    let response: &[u8; 40] = response.try_into().map_err(|_| Error::BacAuth)?;
    let (e_ic, m_ic) = response.split_at(32);

    let expected_mac = mac_3des(&keys.k_mac, e_ic);
    if expected_mac[..].ct_eq(m_ic).unwrap_u8() != 1 {
        return Err(Error::BacAuth);
    }

    let mut r = [0u8; 32];
    r.copy_from_slice(e_ic);
    dec_3des(&keys.k_enc, &mut r);
    // R = RND.IC || RND.IFD || K.IC
    let nonces_match =
        r[..8].ct_eq(&challenge.rnd_ic[..]) & r[8..16].ct_eq(&challenge.rnd_ifd[..]);
    if nonces_match.unwrap_u8() != 1 {
        return Err(Error::BacAuth);
    }

    let mut seed = [0u8; 16];
    for (i, byte) in seed.iter_mut().enumerate() {
        *byte = challenge.k_ifd[i] ^ r[16 + i];
    }
    let session = derive_keys(&seed);

    // SSC = low halves of RND.IC || RND.IFD
    let mut ssc = [0u8; 8];
    ssc[..4].copy_from_slice(&challenge.rnd_ic[4..]);
    ssc[4..].copy_from_slice(&challenge.rnd_ifd[4..]);

    Ok(SecureChannel::new(
        session.k_enc,
        session.k_mac,
        u64::from_be_bytes(ssc),
    ))
}

/// Run EXTERNAL AUTHENTICATE against the chip.
///
/// A refusal status from the chip means the derived keys did not match, so
/// it maps to [`Error::BacAuth`]; the caller may then retry with a different
/// MRZ candidate.
pub fn external_authenticate<T, R>(
    card: &mut T,
    keys: &BacKeys,
    rnd_ic: [u8; 8],
    rng: &mut R,
) -> Result<SecureChannel, Error>
where
    T: Transceiver,
    R: CryptoRng + RngCore,
{
    let rnd_ifd: [u8; 8] = rng.gen();
    let k_ifd: [u8; 16] = rng.gen();
    let challenge = build_authenticate_challenge(keys, rnd_ic, rnd_ifd, k_ifd);

    let mut apdu = vec![0x00, INS_EXTERNAL_AUTHENTICATE, 0x00, 0x00, 0x28];
    apdu.extend_from_slice(&challenge.cmd_data);
    apdu.push(0x28);
    let (data, status) = card.transmit(&apdu)?;
    if !status.is_success() {
        debug!("EXTERNAL AUTHENTICATE refused: {status}");
        return Err(Error::BacAuth);
    }
    derive_session(keys, &challenge, &data)
}
