pub mod fsobject;
