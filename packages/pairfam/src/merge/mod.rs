pub mod joint_merger;
