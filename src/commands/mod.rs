pub mod debugger_command;
pub mod debugger_event;
