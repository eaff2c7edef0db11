//! ICAO 9303 Basic Access Control reader for electronic travel documents.
//!
//! Authenticates to the chip with keys derived from the machine-readable
//! zone, then reads EF.COM, DG1 and DG2 under Secure Messaging and streams
//! the encoded face image to a byte sink.
//!
//! ```ignore
//! use emrtd_reader::{CancelToken, ChipReader, PcscReader};
//!
//! let card = PcscReader::connect(&CancelToken::new())?;
//! let mut reader = ChipReader::new(card);
//! let mut image = std::fs::File::create("face.jpg")?;
//! let record = reader.read_id_chip("L898902C<369080619406236", &mut image)?;
//! println!("{} ({})", record.mrz.name, record.mrz.document_number);
//! ```

pub mod bac;
pub mod chip;
pub mod dg;
pub mod error;
pub mod iso7816;
pub mod mrz;
#[cfg(feature = "pcsc")]
pub mod reader;
pub mod secure;
pub mod tdes;
pub mod transceiver;

#[cfg(feature = "pcsc")]
pub use crate::reader::PcscReader;
pub use crate::{
    chip::{ChipReader, DocumentRecord},
    dg::{Dg1Fields, EfCom, FileId},
    error::Error,
    mrz::BirthdateSearch,
    secure::SecureChannel,
    transceiver::{CancelToken, Transceiver},
};
