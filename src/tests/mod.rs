// Tests for the relay core
mod close;
mod common;
