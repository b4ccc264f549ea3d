mod support;

mod publisher_tests;
