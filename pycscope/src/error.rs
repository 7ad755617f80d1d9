use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The walker has no partial-recovery strategy for structural errors: any fatal condition
/// terminates the walk immediately. The three kinds front ends typically map to distinct
/// exit codes are [`Error::Incompatible`], [`Error::UnknownTypeCode`] and
/// [`Error::MalformedLong`]; everything else is a parsing-safety or environment failure.
///
/// # Examples
///
/// ```rust,no_run
/// use pycscope::{Error, Pyc};
/// use pycscope::rules::CpythonRules;
///
/// match Pyc::from_path(std::path::Path::new("obfuscated.pyc"))
///     .and_then(|pyc| pyc.rewrite(&CpythonRules::new()))
/// {
///     Ok(walked) => println!("rewrote {} bytes", walked.data.len()),
///     Err(Error::Incompatible) => eprintln!("not a pyc stream we understand"),
///     Err(Error::UnknownTypeCode(code)) => eprintln!("unexpected type code 0x{code:02X}"),
///     Err(e) => eprintln!("error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The stream is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected
    /// for debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the stream.
    ///
    /// This is a safety check to prevent buffer overruns; truncated obfuscated
    /// inputs commonly end here.
    #[error("Out of bound read would have occurred!")]
    OutOfBounds,

    /// The rules' compatibility check rejected the input.
    #[error("Input is not a compatible pyc stream")]
    Incompatible,

    /// Encountered a byte that is neither a recognized marshal type code nor remapped.
    ///
    /// The associated value is the offending 7-bit code.
    #[error("Unexpected marshal type code - 0x{0:02X}")]
    UnknownTypeCode(u8),

    /// A long-integer body violated the marshal digit encoding.
    ///
    /// Marshal digits are 15-bit; the associated value is the high byte of the
    /// first digit that had bit 15 set.
    #[error("Malformed long integer digit - high byte 0x{0:02X}")]
    MalformedLong(u8),

    /// Recursion limit reached.
    ///
    /// The marshal graph nests containers and code objects; a depth bound prevents
    /// stack overflow on adversarial inputs. The associated value is the limit.
    #[error("Reached the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// The rules file could not be loaded or failed validation.
    #[error("Invalid rules - {0}")]
    Rules(String),

    /// A rules hook requested the walk to stop.
    #[error("Walk aborted by rules hook")]
    Aborted,
}
