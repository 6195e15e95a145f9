//! Query modules for Frameseek entities stored in Redis.

pub mod keyframes;
