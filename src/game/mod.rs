//! Game content: the problem sequence played in a lobby and the result
//! records written when a game ends.

pub mod problem;
pub mod results;

pub use problem::{Problem, ProblemSet};
pub use results::{GameRecord, ResultsError, ResultsStore, UserScore};
