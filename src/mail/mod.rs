//! Message parsing: addresses, structured headers, header store and the MIME
//! part tree

pub mod address;
pub mod envelope;
pub mod header;
pub mod multipart;
pub mod params;
pub mod post_office;

pub use address::{parse_address, parse_address_list, AddressFormatError, ParsedAddress};
pub use envelope::{Envelope, PartPath};
pub use header::{HeaderStore, HeaderValue, RawHeader};
pub use params::{parse_semicolon_delimited, Params, StructuredHeaderError};
pub use post_office::{ConsolePostOffice, PostOffice};

/// Lines of a CRLF delimited buffer, without their terminators
///
/// A final CRLF does not produce a trailing empty line.
pub(crate) fn crlf_lines(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = bytes;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        match rest.windows(2).position(|pair| pair == b"\r\n") {
            Some(pos) => {
                let line = &rest[..pos];
                rest = &rest[pos + 2..];
                Some(line)
            }
            None => {
                let line = rest;
                rest = &[];
                Some(line)
            }
        }
    })
}
