mod service_change_case1;
