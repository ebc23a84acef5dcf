pub mod ead;
pub mod ecl;
pub mod lgd;
pub mod pd;
