// fieldsync-common: document paths, the text change algebra and the
// collaboration wire protocol shared by the client and its tools.

pub mod change;
pub mod path;
pub mod protocol;
