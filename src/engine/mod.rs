// Tournament execution engine: the strategy sandbox and the match
// simulator built on top of it.

pub mod game;
pub mod sandbox;
