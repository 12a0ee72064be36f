#[cfg(test)]
mod resolver_tests {
    use pretty_assertions::assert_eq;

    use rox::ast::Stmt;
    use rox::parser::Parser;
    use rox::resolver::{Binding, Resolver};
    use rox::scanner::scan;

    fn parse(source: &str) -> Vec<Stmt> {
        let (tokens, errors) = scan(source.as_bytes());
        assert!(errors.is_empty(), "scan errors: {:?}", errors);

        Parser::new(tokens).parse().expect("program parses")
    }

    fn resolve_errors(source: &str) -> Vec<String> {
        match Resolver::new().resolve(&parse(source)) {
            Ok(_) => Vec::new(),
            Err(errors) => errors.iter().map(|e| e.to_string()).collect(),
        }
    }

    fn bindings(source: &str) -> Vec<(usize, usize)> {
        let locals = Resolver::new()
            .resolve(&parse(source))
            .expect("program resolves");

        let mut pairs: Vec<(usize, usize)> = locals
            .values()
            .map(|Binding { depth, slot }| (*depth, *slot))
            .collect();
        pairs.sort();
        pairs
    }

    #[test]
    fn test_resolving_twice_yields_the_same_table() {
        let program = parse(
            r#"
            fun make() {
                var i = 0;
                fun inc() { i = i + 1; return i; }
                return inc;
            }
            {
                var f = make();
                print f();
            }
            "#,
        );

        let mut resolver = Resolver::new();
        let first = resolver.resolve(&program).expect("first pass");
        let second = resolver.resolve(&program).expect("second pass");

        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_own_initializer_read_is_an_error_in_local_scope() {
        assert_eq!(
            resolve_errors("{ var a = a; print a; }"),
            vec!["[line 1] Error at 'a': Can't read local variable in its own initializer."]
        );
    }

    #[test]
    fn test_own_initializer_read_is_allowed_for_globals() {
        assert!(resolve_errors("var a = a;").is_empty());
    }

    #[test]
    fn test_shadowing_resolves_to_the_innermost_binding() {
        // a (outer) read from one scope down, b read in its own scope.
        assert_eq!(
            bindings("{ var a = 1; { var b = a; print b; } }"),
            vec![(0, 0), (1, 0)]
        );
    }

    #[test]
    fn test_closure_reads_walk_out_of_the_function_scope() {
        // `i` is read one scope out of inc; `inc` is read from make's own scope.
        assert_eq!(
            bindings("fun make() { var i = 0; fun inc() { return i; } return inc; }"),
            vec![(0, 1), (1, 0)]
        );
    }

    #[test]
    fn test_redeclaration_in_the_same_scope() {
        assert_eq!(
            resolve_errors("{ var a = 1; var a = 2; print a; }"),
            vec!["[line 1] Error at 'a': Already a variable with this name in this scope."]
        );
    }

    #[test]
    fn test_unused_local_function_and_class() {
        assert_eq!(
            resolve_errors("{ fun helper() {} class Shape {} }"),
            vec![
                "[line 1] Error at 'helper': Local variable is not used.",
                "[line 1] Error at 'Shape': Local variable is not used.",
            ]
        );
    }

    #[test]
    fn test_parameters_and_this_are_exempt_from_the_unused_check() {
        assert!(resolve_errors("class A { m(unusedParam) { return 1; } }").is_empty());
        assert!(resolve_errors("fun f(x) {}").is_empty());
    }

    #[test]
    fn test_misplaced_return() {
        assert_eq!(
            resolve_errors("return 1;"),
            vec!["[line 1] Error at 'return': Can't return from top-level code."]
        );
        assert_eq!(
            resolve_errors("class C { init() { return 1; } }"),
            vec!["[line 1] Error at 'return': Can't return a value from an initializer."]
        );
        assert!(resolve_errors("class C { init() { return; } }").is_empty());
    }

    #[test]
    fn test_misplaced_this_and_super() {
        assert_eq!(
            resolve_errors("print this;"),
            vec!["[line 1] Error at 'this': Can't use 'this' outside of a class."]
        );
        assert_eq!(
            resolve_errors("print super.m;"),
            vec!["[line 1] Error at 'super': Can't use 'super' outside of a class."]
        );
        assert_eq!(
            resolve_errors("class C { m() { return super.m; } }"),
            vec!["[line 1] Error at 'super': Can't use 'super' in a class with no superclass."]
        );
        assert_eq!(
            resolve_errors("trait T { m() { return super.m; } }"),
            vec!["[line 1] Error at 'super': Can't use 'super' in a trait."]
        );
    }

    #[test]
    fn test_class_cannot_inherit_from_itself() {
        assert_eq!(
            resolve_errors("class Loop < Loop {}"),
            vec!["[line 1] Error at 'Loop': A class can't inherit from itself."]
        );
    }

    #[test]
    fn test_super_and_this_slots_in_a_subclass_method() {
        // `super` sits past the method scope and the `this` scope.
        let pairs = bindings("class A {} class B < A { m() { return super.m; } }");

        assert_eq!(pairs, vec![(2, 0)]);
    }

    #[test]
    fn test_trait_conflicts_through_trait_composition() {
        assert_eq!(
            resolve_errors(
                "trait A { m() {} }\ntrait B with A {}\ntrait C { m() {} }\nclass D with B, C {}"
            ),
            vec!["[line 4] Error at 'C': A previous trait declares a method named 'm'."]
        );
    }

    #[test]
    fn test_trait_in_a_block_does_not_leak_out_of_it() {
        assert!(resolve_errors(
            r#"
            trait A { m() {} }
            {
                trait A { x() {} }
                class D with A {}
                print D;
            }
            trait B { x() {} }
            class C with A, B {}
            "#
        )
        .is_empty());
    }

    #[test]
    fn test_trait_conflicts_inside_a_block() {
        assert_eq!(
            resolve_errors(
                "trait A { x() {} }\n{\n  trait A { m() {} }\n  trait B { m() {} }\n  class C with A, B {}\n  print C;\n}"
            ),
            vec!["[line 5] Error at 'B': A previous trait declares a method named 'm'."]
        );
    }

    #[test]
    fn test_all_errors_are_collected() {
        assert_eq!(
            resolve_errors("return;\nprint this;"),
            vec![
                "[line 1] Error at 'return': Can't return from top-level code.",
                "[line 2] Error at 'this': Can't use 'this' outside of a class.",
            ]
        );
    }
}
