//! Process exit codes for `flowgrid`.
//!
//! | Code | Meaning                                     |
//! |------|---------------------------------------------|
//! | 0    | Success                                     |
//! | 1    | General error (terminal, final save failed) |
//! | 2    | Usage error (no file given or remembered)   |
//! | 3    | Workbook missing or unreadable              |
//! | 4    | Requested sheet or cluster not found        |

pub const EXIT_SUCCESS: u8 = 0;

pub const EXIT_ERROR: u8 = 1;

pub const EXIT_USAGE: u8 = 2;

/// The workbook could not be opened or parsed.
pub const EXIT_WORKBOOK: u8 = 3;

/// `--sheet` or `--cluster` named something the workbook does not have.
pub const EXIT_NOT_FOUND: u8 = 4;
