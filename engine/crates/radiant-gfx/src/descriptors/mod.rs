pub mod descriptor_table;
