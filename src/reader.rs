//! PC/SC card-reader backend.

use crate::{
    error::Error,
    iso7816::StatusWord,
    transceiver::{CancelToken, Transceiver},
};
use log::{debug, info};
use pcsc::{Card, Context, Protocols, Scope, ShareMode, MAX_BUFFER_SIZE};
use std::{thread, time::Duration};

/// Card-detection polling interval.
const DETECT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A PC/SC-backed [`Transceiver`].
///
/// The card handle is owned by the value; disconnecting happens on drop, so
/// release is tied to scope on every exit path. The PC/SC context is kept
/// alive by the card handle itself.
pub struct PcscReader {
    card: Card,
}

impl PcscReader {
    /// Establish a context on the first attached reader and wait for a card,
    /// polling until one is present or `cancel` fires.
    pub fn connect(cancel: &CancelToken) -> Result<Self, Error> {
        let context =
            Context::establish(Scope::User).map_err(|e| Error::ReaderInit(e.to_string()))?;

        let mut readers_buf = [0u8; 2048];
        let mut names = context
            .list_readers(&mut readers_buf)
            .map_err(|e| Error::ReaderInit(e.to_string()))?;
        let reader = names
            .next()
            .ok_or_else(|| Error::ReaderInit("no card reader attached".into()))?;
        info!("using reader {:?}", reader.to_string_lossy());

        loop {
            if cancel.is_cancelled() {
                return Err(Error::CardNotPresent(
                    "cancelled while waiting for a card".into(),
                ));
            }
            match context.connect(reader, ShareMode::Shared, Protocols::ANY) {
                Ok(card) => {
                    info!("card detected");
                    return Ok(Self { card });
                }
                Err(pcsc::Error::NoSmartcard) | Err(pcsc::Error::RemovedCard) => {
                    thread::sleep(DETECT_POLL_INTERVAL);
                }
                Err(e) => return Err(Error::Transport(e.to_string())),
            }
        }
    }
}

impl Transceiver for PcscReader {
    fn transmit(&mut self, apdu: &[u8]) -> Result<(Vec<u8>, StatusWord), Error> {
        debug!("> {}", hex::encode_upper(apdu));
        let mut buf = [0u8; MAX_BUFFER_SIZE];
        let response = self
            .card
            .transmit(apdu, &mut buf)
            .map_err(|e| Error::Transport(e.to_string()))?;
        debug!("< {}", hex::encode_upper(response));

        if response.len() < 2 {
            return Err(Error::Transport("response shorter than a status word".into()));
        }
        let (body, trailer) = response.split_at(response.len() - 2);
        Ok((body.to_vec(), StatusWord::new(trailer[0], trailer[1])))
    }
}
