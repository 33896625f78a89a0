pub mod call_frame;
pub mod chunk;
pub mod compiler;
pub mod constants;
pub mod debug;
pub mod gc;
pub mod objects;
pub mod scanner;
pub mod std_mod;
pub mod table;
pub mod value;
pub mod vm;
