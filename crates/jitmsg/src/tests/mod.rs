mod duplicate;
mod reset;
mod test_helpers;
