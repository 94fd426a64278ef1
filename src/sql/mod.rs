pub mod dialect;
pub mod optimizer;
pub mod postprocess;
pub mod validator;
