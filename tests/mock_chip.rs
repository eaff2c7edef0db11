//! End-to-end tests against a simulated chip.
//!
//! The mock implements the card side of BAC and Secure Messaging on top of
//! the crate's own primitives: it verifies command MACs with its own send
//! sequence counter, serves synthetic EF.COM/DG1/DG2 files and wraps every
//! response the way a real chip would.

use emrtd_reader::{
    bac::{self, BacKeys},
    iso7816::{
        encode_ber_length, parse_ber_length, StatusWord, AID_MRTD, INS_EXTERNAL_AUTHENTICATE,
        INS_GET_CHALLENGE, INS_READ_BINARY, INS_SELECT, TAG_DO87, TAG_DO8E, TAG_DO97, TAG_DO99,
    },
    mrz,
    tdes::{dec_3des, enc_3des, mac_3des, pad2},
    BirthdateSearch, ChipReader, Error, Transceiver,
};
use hex_literal::hex;

const MRZ_KEY_INPUT: &str = "L898902C<369080619406236";
const RND_IC: [u8; 8] = hex!("4608F91988702212");
const K_IC: [u8; 16] = hex!("0B4F80323EB3191CB04970CB4052790B");

const EF_COM: [u8; 22] = hex!("60145F0104303130365F36063034303030305C026175");

fn dg1_fixture() -> Vec<u8> {
    let mrz = b"P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<\
                L898902C36UTO7408122F1204159ZE184226B<<<<<10";
    let mut dg1 = vec![0x61, (mrz.len() + 3) as u8, 0x5F, 0x1F, mrz.len() as u8];
    dg1.extend_from_slice(mrz);
    dg1
}

/// A 1500-byte DG2: outer tag with a long-form length, a marker-free
/// biometric header, then a JPEG marker and filler payload. Returns the file
/// and the marker offset.
fn dg2_fixture() -> (Vec<u8>, usize) {
    const TOTAL: usize = 1500;
    let mut dg2 = vec![0x75, 0x82];
    dg2.extend_from_slice(&((TOTAL - 4) as u16).to_be_bytes());
    dg2.extend_from_slice(&[0x7F, 0x61, 0x82, 0x05, 0xCE, 0x02, 0x01, 0x01]);
    while dg2.len() < 44 {
        dg2.push(0x00);
    }
    let magic_at = dg2.len();
    dg2.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0]);
    let mut byte: u8 = 0;
    while dg2.len() < TOTAL {
        byte = byte.wrapping_mul(31).wrapping_add(7);
        dg2.push(byte);
    }
    (dg2, magic_at)
}

struct CardSession {
    ks_enc: [u8; 16],
    ks_mac: [u8; 16],
    ssc: u64,
}

struct MockChip {
    keys: BacKeys,
    rnd_ic: [u8; 8],
    k_ic: [u8; 16],
    session: Option<CardSession>,
    selected: Option<u16>,
    ef_com: Vec<u8>,
    dg1: Vec<u8>,
    dg2: Vec<u8>,
    /// Flip a MAC byte in the Nth protected response.
    tamper_response_at: Option<usize>,
    protected_responses: usize,
    refuse_select_app: bool,
}

impl MockChip {
    fn new(mrz_key_input: &str) -> Self {
        Self {
            keys: bac::derive_keys(&bac::seed_from_mrz(mrz_key_input)),
            rnd_ic: RND_IC,
            k_ic: K_IC,
            session: None,
            selected: None,
            ef_com: EF_COM.to_vec(),
            dg1: dg1_fixture(),
            dg2: dg2_fixture().0,
            tamper_response_at: None,
            protected_responses: 0,
            refuse_select_app: false,
        }
    }

    fn external_authenticate(&mut self, cmd_data: &[u8]) -> (Vec<u8>, StatusWord) {
        let (e_ifd, m_ifd) = cmd_data.split_at(32);
        if mac_3des(&self.keys.k_mac, e_ifd) != m_ifd {
            return (Vec::new(), StatusWord(0x6300));
        }

        let mut s = e_ifd.to_vec();
        dec_3des(&self.keys.k_enc, &mut s);
        if s[8..16] != self.rnd_ic {
            return (Vec::new(), StatusWord(0x6300));
        }
        let rnd_ifd: [u8; 8] = s[..8].try_into().unwrap();
        let k_ifd: [u8; 16] = s[16..].try_into().unwrap();

        let mut r = [0u8; 32];
        r[..8].copy_from_slice(&self.rnd_ic);
        r[8..16].copy_from_slice(&rnd_ifd);
        r[16..].copy_from_slice(&self.k_ic);
        enc_3des(&self.keys.k_enc, &mut r);
        let m_ic = mac_3des(&self.keys.k_mac, &r);

        let mut seed = [0u8; 16];
        for (i, byte) in seed.iter_mut().enumerate() {
            *byte = k_ifd[i] ^ self.k_ic[i];
        }
        let session_keys = bac::derive_keys(&seed);
        let mut ssc = [0u8; 8];
        ssc[..4].copy_from_slice(&self.rnd_ic[4..]);
        ssc[4..].copy_from_slice(&rnd_ifd[4..]);
        self.session = Some(CardSession {
            ks_enc: session_keys.k_enc,
            ks_mac: session_keys.k_mac,
            ssc: u64::from_be_bytes(ssc),
        });

        let mut response = r.to_vec();
        response.extend_from_slice(&m_ic);
        (response, StatusWord::SUCCESS)
    }

    fn protected(&mut self, apdu: &[u8]) -> (Vec<u8>, StatusWord) {
        let Some(mut session) = self.session.take() else {
            return (Vec::new(), StatusWord(0x6985));
        };

        let header: [u8; 4] = apdu[..4].try_into().unwrap();
        let lc = apdu[4] as usize;
        let body = &apdu[5..5 + lc];
        let (do87, do97, mac) = split_command_objects(body);

        session.ssc += 1;
        let mut n = session.ssc.to_be_bytes().to_vec();
        n.extend_from_slice(&header);
        n.extend_from_slice(&[0x80, 0x00, 0x00, 0x00]);
        if let Some(do87) = &do87 {
            n.extend_from_slice(do87);
        }
        if let Some(le) = do97 {
            n.extend_from_slice(&[TAG_DO97, 0x01, le]);
        }
        if mac_3des(&session.ks_mac, &n) != mac {
            return (Vec::new(), StatusWord(0x6988));
        }

        let result = match header[1] {
            INS_SELECT => {
                let do87 = do87.expect("SELECT carries a cryptogram");
                let (_, len_bytes) = parse_ber_length(&do87[1..]).unwrap();
                let mut plain = do87[1 + len_bytes + 1..].to_vec();
                dec_3des(&session.ks_enc, &mut plain);
                while plain.last() == Some(&0x00) {
                    plain.pop();
                }
                assert_eq!(plain.pop(), Some(0x80));
                self.selected = Some(u16::from_be_bytes(plain[..2].try_into().unwrap()));
                Vec::new()
            }
            INS_READ_BINARY => {
                let offset = u16::from_be_bytes([header[2], header[3]]) as usize;
                let le = match do97.expect("READ BINARY carries DO97") {
                    0 => 256,
                    le => le as usize,
                };
                let file = match self.selected {
                    Some(0x011E) => &self.ef_com,
                    Some(0x0101) => &self.dg1,
                    Some(0x0102) => &self.dg2,
                    _ => return (Vec::new(), StatusWord(0x6A82)),
                };
                let start = offset.min(file.len());
                file[start..(offset + le).min(file.len())].to_vec()
            }
            _ => return (Vec::new(), StatusWord(0x6D00)),
        };

        let response = self.wrap_response(&mut session, &result);
        self.session = Some(session);
        (response, StatusWord::SUCCESS)
    }

    fn wrap_response(&mut self, session: &mut CardSession, payload: &[u8]) -> Vec<u8> {
        let do87 = if payload.is_empty() {
            Vec::new()
        } else {
            let mut cryptogram = payload.to_vec();
            pad2(&mut cryptogram);
            enc_3des(&session.ks_enc, &mut cryptogram);
            let mut do87 = vec![TAG_DO87];
            do87.extend_from_slice(&encode_ber_length(cryptogram.len() + 1));
            do87.push(0x01);
            do87.extend_from_slice(&cryptogram);
            do87
        };
        let do99 = [TAG_DO99, 0x02, 0x90, 0x00];

        session.ssc += 1;
        let mut k = session.ssc.to_be_bytes().to_vec();
        k.extend_from_slice(&do87);
        k.extend_from_slice(&do99);
        let mut cc = mac_3des(&session.ks_mac, &k);

        self.protected_responses += 1;
        if self.tamper_response_at == Some(self.protected_responses) {
            cc[0] ^= 0x01;
        }

        let mut response = do87;
        response.extend_from_slice(&do99);
        response.push(TAG_DO8E);
        response.push(8);
        response.extend_from_slice(&cc);
        response
    }
}

impl Transceiver for MockChip {
    fn transmit(&mut self, apdu: &[u8]) -> Result<(Vec<u8>, StatusWord), Error> {
        if apdu[0] == 0x0C {
            let (body, sw) = self.protected(apdu);
            return Ok((body, sw));
        }
        match apdu[1] {
            INS_SELECT => {
                assert_eq!(&apdu[5..12], &AID_MRTD);
                if self.refuse_select_app {
                    Ok((Vec::new(), StatusWord(0x6A82)))
                } else {
                    Ok((Vec::new(), StatusWord::SUCCESS))
                }
            }
            INS_GET_CHALLENGE => Ok((self.rnd_ic.to_vec(), StatusWord::SUCCESS)),
            INS_EXTERNAL_AUTHENTICATE => {
                let (body, sw) = self.external_authenticate(&apdu[5..45]);
                Ok((body, sw))
            }
            ins => panic!("unexpected instruction {ins:02X}"),
        }
    }
}

fn split_command_objects(body: &[u8]) -> (Option<Vec<u8>>, Option<u8>, [u8; 8]) {
    let mut do87 = None;
    let mut do97 = None;
    let mut mac = [0u8; 8];
    let mut rest = body;
    while !rest.is_empty() {
        let tag = rest[0];
        let (len, len_bytes) = parse_ber_length(&rest[1..]).expect("data-object length");
        let (tlv, tail) = rest.split_at(1 + len_bytes + len);
        match tag {
            TAG_DO87 => do87 = Some(tlv.to_vec()),
            TAG_DO97 => do97 = Some(tlv[2]),
            TAG_DO8E => mac.copy_from_slice(&tlv[2..]),
            tag => panic!("unexpected command data object {tag:02X}"),
        }
        rest = tail;
    }
    (do87, do97, mac)
}

#[test]
fn test_read_id_chip_end_to_end() {
    let mut reader = ChipReader::new(MockChip::new(MRZ_KEY_INPUT));
    let mut image = Vec::new();

    let record = reader.read_id_chip(MRZ_KEY_INPUT, &mut image).unwrap();

    assert_eq!(record.mrz.document_code, "P");
    assert_eq!(record.mrz.issuing_state, "UTO");
    assert_eq!(record.mrz.document_number, "L898902C3");
    assert_eq!(record.mrz.name, "ERIKSSON, ANNA MARIA");
    assert_eq!(record.mrz.nationality, "UTO");
    assert_eq!(record.mrz.date_of_birth, "740812");
    assert_eq!(record.mrz.sex, "F");
    assert_eq!(record.mrz.date_of_expiry, "120415");
    assert_eq!(record.com.lds_version, "0106");
    assert_eq!(record.com.data_groups, vec![0x61, 0x75]);
    assert!(record.face_image);

    // The image is the DG2 tail from the JPEG marker onward, byte for byte.
    let (dg2, magic_at) = dg2_fixture();
    assert_eq!(image, dg2[magic_at..]);
}

#[test]
fn test_wrong_mrz_is_rejected() {
    let mut reader = ChipReader::new(MockChip::new(MRZ_KEY_INPUT));
    let mut image = Vec::new();
    let result = reader.read_id_chip("L898902C<369080619406235", &mut image);
    assert!(matches!(result, Err(Error::BacAuth)));
    assert!(image.is_empty());
}

#[test]
fn test_tampered_response_mac_aborts_session() {
    let mut chip = MockChip::new(MRZ_KEY_INPUT);
    // Second protected response: the READ BINARY serving EF.COM's header.
    chip.tamper_response_at = Some(2);
    let mut reader = ChipReader::new(chip);
    let mut image = Vec::new();
    let result = reader.read_id_chip(MRZ_KEY_INPUT, &mut image);
    assert!(matches!(result, Err(Error::SecureMessaging(_))));
}

#[test]
fn test_refused_application_select_surfaces_status() {
    let mut chip = MockChip::new(MRZ_KEY_INPUT);
    chip.refuse_select_app = true;
    let mut reader = ChipReader::new(chip);
    let mut image = Vec::new();
    let result = reader.read_id_chip(MRZ_KEY_INPUT, &mut image);
    assert!(matches!(result, Err(Error::CardStatus(sw)) if sw.0 == 0x6A82));
}

#[test]
fn test_scan_mode_finds_birth_date() {
    // Holder born 1969-08-06, year digits embedded in the document number.
    let key_input = mrz::compose_key_input(b"A69123456", 8, 6, 2023)
        .unwrap()
        .unwrap();
    let key_input = std::str::from_utf8(&key_input).unwrap();

    let mut reader = ChipReader::new(MockChip::new(key_input));
    let mut image = Vec::new();
    let search = BirthdateSearch {
        months: 7..=9,
        days: 1..=10,
    };
    let record = reader
        .read_id_chip_scan(b"A69123456", &search, 2023, &mut image)
        .unwrap();

    assert_eq!(record.mrz.document_number, "L898902C3");
    assert!(record.face_image);
    assert!(!image.is_empty());
}

#[test]
fn test_scan_mode_exhausts_candidates() {
    let key_input = mrz::compose_key_input(b"A69123456", 8, 6, 2023)
        .unwrap()
        .unwrap();
    let key_input = std::str::from_utf8(&key_input).unwrap();

    let mut reader = ChipReader::new(MockChip::new(key_input));
    let mut image = Vec::new();
    let search = BirthdateSearch {
        months: 1..=2,
        days: 1..=5,
    };
    let result = reader.read_id_chip_scan(b"A69123456", &search, 2023, &mut image);
    assert!(matches!(result, Err(Error::BacAuth)));
}
