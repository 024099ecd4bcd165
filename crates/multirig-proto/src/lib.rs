//! multirig-proto: the Hamlib `rigctl`/`rigctld` text protocol codec.
//!
//! Pure encode/decode with no I/O. The connection layer in `multirig-client`
//! and the front-facing listener both drive this codec:
//!
//! - [`RigctlCommand`] encodes requests in canonical long form, with the `+`
//!   prefix for the Extended Response Protocol, and parses client lines
//!   (short or long form) back into commands.
//! - [`LineBuffer`] / [`RigctlReply`] assemble transport bytes into complete
//!   replies terminated by an `RPRT <int>` line.
//! - [`parse_dump_caps`] interprets the capability report.

pub mod caps;
pub mod command;
pub mod response;

pub use caps::{format_dump_caps, parse_dump_caps};
pub use command::{is_erp_prefix, parse_line, ParsedLine, RigctlCommand};
pub use response::{
    dump_payload, parse_chk_vfo, parse_freq, parse_mode, parse_powerstat, parse_ptt, parse_rprt,
    parse_vfo, LineBuffer, RigctlReply,
};
