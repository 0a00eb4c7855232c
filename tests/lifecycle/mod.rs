mod lifecycle_case1;
mod startup_reconcile;
