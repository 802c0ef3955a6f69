mod scenarios;
mod test_utils;
