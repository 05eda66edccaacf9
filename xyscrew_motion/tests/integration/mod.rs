mod common;
mod endstops;
mod safety_stop;
mod session;
mod startup;
