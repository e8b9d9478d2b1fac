#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;

mod cflowd;
mod config;
mod error;
mod logger;
mod netflow5;
mod pool;
mod reader;
mod rotator;
mod sequence;
mod signals;
mod supervisor;
mod writer;

fn main() {
    supervisor::run();
}
