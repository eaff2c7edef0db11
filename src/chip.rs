//! Orchestration: the fixed BAC → Secure Messaging → data-group sequence.

use crate::{
    bac,
    dg::{self, Dg1Fields, EfCom, FileId},
    error::Error,
    mrz::{self, BirthdateSearch},
    secure::SecureChannel,
    transceiver::Transceiver,
};
use log::{debug, info};
use std::io::Write;

/// Decoded result of a successful chip read.
#[derive(Clone, Debug)]
pub struct DocumentRecord {
    /// MRZ fields from DG1.
    pub mrz: Dg1Fields,
    /// Common data from EF.COM.
    pub com: EfCom,
    /// Whether a face image was written to the sink.
    pub face_image: bool,
}

/// Drives a single card through application selection, BAC and the data
/// group reads.
///
/// The reader owns the transceiver, so the card handle (and whatever reader
/// context stands behind it) is released when the `ChipReader` is dropped,
/// on success and on every failure path alike.
pub struct ChipReader<T: Transceiver> {
    card: T,
}

impl<T: Transceiver> ChipReader<T> {
    pub fn new(card: T) -> Self {
        Self { card }
    }

    /// Give the transceiver back, e.g. to read a second document.
    pub fn into_inner(self) -> T {
        self.card
    }

    /// Read EF.COM, DG1 and DG2 using the full MRZ key input: the document
    /// number, birth date and expiry date, each followed by its check digit.
    pub fn read_id_chip<W: Write>(
        &mut self,
        mrz_key_input: &str,
        image_sink: &mut W,
    ) -> Result<DocumentRecord, Error> {
        bac::select_application(&mut self.card)?;

        let keys = bac::derive_keys(&bac::seed_from_mrz(mrz_key_input));
        let rnd_ic = bac::get_challenge(&mut self.card)?;
        let mut sm =
            bac::external_authenticate(&mut self.card, &keys, rnd_ic, &mut rand::thread_rng())?;
        info!("basic access control established");

        self.read_data_groups(&mut sm, image_sink)
    }

    /// Recover chip access from the document number alone by brute forcing
    /// the birth date.
    ///
    /// Only [`Error::BacAuth`] advances the search; transport, status and
    /// sink errors abort immediately.
    pub fn read_id_chip_scan<W: Write>(
        &mut self,
        document_number: &[u8; 9],
        birthdate_search: &BirthdateSearch,
        current_year: u16,
        image_sink: &mut W,
    ) -> Result<DocumentRecord, Error> {
        bac::select_application(&mut self.card)?;

        let mut rng = rand::thread_rng();
        for (month, day) in birthdate_search.candidates() {
            let Some(key_input) =
                mrz::compose_key_input(document_number, month, day, current_year)?
            else {
                continue;
            };
            let key_input = std::str::from_utf8(&key_input).expect("MRZ candidates are ASCII");

            let keys = bac::derive_keys(&bac::seed_from_mrz(key_input));
            let rnd_ic = bac::get_challenge(&mut self.card)?;
            match bac::external_authenticate(&mut self.card, &keys, rnd_ic, &mut rng) {
                Ok(mut sm) => {
                    info!("basic access control established with birth date {month:02}-{day:02}");
                    return self.read_data_groups(&mut sm, image_sink);
                }
                Err(Error::BacAuth) => {
                    debug!("candidate {month:02}-{day:02} rejected");
                }
                Err(err) => return Err(err),
            }
        }
        Err(Error::BacAuth)
    }

    fn read_data_groups<W: Write>(
        &mut self,
        sm: &mut SecureChannel,
        image_sink: &mut W,
    ) -> Result<DocumentRecord, Error> {
        let com = dg::parse_ef_com(&dg::read_file(&mut self.card, sm, FileId::EfCom)?)?;
        debug!(
            "EF.COM: LDS {}, Unicode {}, data groups {:02X?}",
            com.lds_version, com.unicode_version, com.data_groups
        );

        let mrz = dg::parse_dg1(&dg::read_file(&mut self.card, sm, FileId::Dg1)?)?;
        debug!("DG1: {} {}", mrz.document_number, mrz.name);

        let face_image = dg::stream_face_image(&mut self.card, sm, image_sink)?;

        Ok(DocumentRecord {
            mrz,
            com,
            face_image,
        })
    }
}
