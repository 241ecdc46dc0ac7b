pub mod global_variables;
