mod io_domain_tests;
