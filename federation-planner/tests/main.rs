mod planner_tests;
