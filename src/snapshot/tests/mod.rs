pub(crate) mod helpers;

mod tests_frame;
mod tests_merge;
mod tests_reader;
